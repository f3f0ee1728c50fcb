pub mod cli;
pub mod config;
pub mod error;
pub mod keyword;
pub mod logging;
pub mod redirect;
pub mod resolver;
pub mod store;
pub mod transport;

pub use config::Config;
pub use redirect::{Interaction, Outcome, RedirectMachine};
pub use resolver::AttributionResolver;
pub use store::Store;
