mod health;
mod properties;
mod proxy;

pub use health::*;
pub use properties::*;
pub use proxy::*;

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    message: String,
}
