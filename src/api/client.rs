use std::time::Duration;

use reqwest::Client;

use crate::prelude::*;

/// Build a default client with a fixed request timeout, shared by every
/// HTTP collaborator implementation in this crate.
pub fn try_new() -> Result<Client> {
    Ok(Client::builder().timeout(Duration::from_secs(10)).build()?)
}
