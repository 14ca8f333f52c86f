pub mod chrome;
pub mod driver;

pub use chrome::{ChromeBrowser, ChromePage, ConnectionMode};
pub use driver::{LoadState, Locator, OptionSource, PageDriver, PageFactory, ScreenshotScope};
