// Domain-layer modules and shared errors/models
pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod scoring {
    pub use crate::scoring::*;
}

pub mod runner {
    pub use crate::runner::*;
}

pub mod errors {
    pub use crate::errors::*;
}
