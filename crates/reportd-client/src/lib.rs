pub mod http;
pub mod notify;

#[cfg(feature = "browser")]
pub mod browser;

pub use http::{HttpClient, PageResponse, RequestOptions};
pub use notify::PushPlusNotifier;

#[cfg(feature = "browser")]
pub use browser::{BrowserSession, BrowserSessionFactory};
