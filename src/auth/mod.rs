pub mod handlers;
pub mod jwt;
pub mod lockout;
pub mod middleware;
pub mod model;
pub mod service;


pub use middleware::AuthenticatedUser;
pub use service::AuthService;
