pub mod admin;
pub mod click;
pub mod geo;
pub mod health;
pub mod policy;
pub mod postback;
pub mod proxy;
pub mod sync;
pub mod verification;

pub use admin::AdminService;
pub use click::ClickService;
pub use geo::GeoService;
pub use health::{AppStartTime, HealthService};
pub use policy::EntitlementPolicy;
pub use postback::PostbackService;
pub use proxy::ProxyService;
pub use sync::{EntitlementSync, PremiumService};
pub use verification::VerificationService;
