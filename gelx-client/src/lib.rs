/*!
Client engine for the gelx database.

The [`raw`] module holds the transport-free protocol state machine;
[`Client`] drives it over tokio, [`blocking::Client`] over a plain
socket. Everything above the socket — codecs, caches, session state and
the retry policy — is shared between the two.

```rust,no_run
# async fn example() -> Result<(), gelx_errors::Error> {
use gelx_client::{Client, Config};

let config = Config::new("localhost", 5656)
    .user("admin")
    .password("secret")
    .database("app");
let mut client = Client::connect(config).await?;
let names = client.query("select User.name", ()).await?;
# drop(names);
# Ok(())
# }
```
*/

pub mod blocking;
mod cache;
mod client;
mod config;
mod options;
mod queries;
pub mod raw;
mod scram;
mod state;
mod transaction;

pub use cache::{CachedQuery, Fingerprint, QueryCache};
pub use client::{Client, Transaction};
pub use config::Config;
pub use options::{default_backoff, RetryCondition, RetryOptions};
pub use queries::QueryParams;
pub use state::SessionState;

pub use gelx_errors::Error;
pub use gelx_protocol::query_arg::Arguments;
pub use gelx_protocol::value::Value;
