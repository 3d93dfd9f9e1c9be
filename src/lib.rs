pub mod backoff;
pub mod config;
pub mod countdown;
pub mod ctfd_fetch;
pub mod error;
pub mod fake_feed;
pub mod feed;
pub mod first_blood;
pub mod http_client;
pub mod leader;
pub mod poller;
pub mod state;
