pub mod chromium;

pub use chromium::{BrowserOptions, ChromiumDriver, find_chrome_binary};
