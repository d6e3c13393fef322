//! External service integrations.

pub mod captcha {
    pub use crate::captcha::*;
}

pub mod proxy_pool {
    pub use crate::proxy_pool::*;
}

pub mod registry_client {
    pub use crate::registry_client::*;
}

pub mod sources {
    pub use crate::sources::*;
}

pub mod sink {
    pub use crate::sink::*;
}
