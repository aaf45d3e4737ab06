pub mod builder;
pub mod client;
pub mod codec;
pub(crate) mod connection;
pub(crate) mod dispatch;
pub mod cookies;
pub mod fetch;
pub mod local_fetch;
pub mod proxy;
pub(crate) mod reader;
pub mod response;
pub mod subscription;
pub mod user_agent;

#[cfg(test)]
mod testing;

pub use builder::{pack_kwargs, RequestBuilder};
pub use client::Client;
pub use cookies::{BrowserCookie, NetscapeCookie, SameSitePolicy};
pub use fetch::{FetchEvent, FetchHandle, FetchRequest, HeaderList, RedirectMode, RequestMeta, ResponseMeta};
pub use proxy::{InterceptedRequest, InterceptedResponse, ProxyContext, ProxyOptions};
pub use response::Response;
pub use subscription::Subscription;
