// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod run_state {
    pub use crate::run_state::*;
}
