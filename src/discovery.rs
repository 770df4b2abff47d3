//! Service discovery: continuous browsing and one-shot resolving

mod browser;
pub use browser::Browser;

pub mod errors;

mod event;
pub use event::{BrowseEvent, ServiceListener};

mod info;
pub use info::{ServiceInfo, TxtProperties};

mod resolve;
mod schedule;
