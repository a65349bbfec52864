pub mod auth;
pub mod error;
pub mod extract;
pub mod responses;
pub mod router;
pub mod state;
pub mod token;
pub mod uploads;

pub use auth::AuthAdmin;
pub use error::{AppError, AppResult};
pub use extract::{ApiJson, ApiPath};
pub use responses::ApiMessage;
pub use state::AppState;
