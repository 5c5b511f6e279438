//! A read-only HTTP store.

use std::{collections::HashMap, str::FromStr};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH},
    StatusCode, Url,
};
use thiserror::Error;

use crate::{MaybeBytes, ReadableStorageTraits, StorageError, StoreKey};

/// A synchronous, read-only HTTP store.
///
/// Store keys are resolved against a base URL. Opaque storage options are
/// forwarded to every request as HTTP headers, which is where remote
/// deployments put authentication tokens.
#[derive(Debug)]
pub struct HttpStore {
    base_url: Url,
    client: reqwest::blocking::Client,
}

fn handle_reqwest_error(err: reqwest::Error) -> StorageError {
    StorageError::Other(err.to_string())
}

impl HttpStore {
    /// Create a new HTTP store at a given `base_url`.
    ///
    /// # Errors
    /// Returns a [`HttpStoreCreateError`] if `base_url` is not a valid URL.
    pub fn new(base_url: &str) -> Result<Self, HttpStoreCreateError> {
        Self::new_with_options(base_url, &HashMap::new())
    }

    /// Create a new HTTP store at a given `base_url` with request `options`.
    ///
    /// Each option becomes a default header on every request.
    ///
    /// # Errors
    /// Returns a [`HttpStoreCreateError`] if `base_url` is not a valid URL or
    /// an option is not a valid header.
    pub fn new_with_options(
        base_url: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, HttpStoreCreateError> {
        let base_url = Url::from_str(base_url)
            .map_err(|_| HttpStoreCreateError::InvalidBaseUrl(base_url.into()))?;
        let mut headers = HeaderMap::new();
        for (name, value) in options {
            let name = HeaderName::from_str(name)
                .map_err(|_| HttpStoreCreateError::InvalidOption(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| HttpStoreCreateError::InvalidOption(value.clone()))?;
            headers.insert(name, value);
        }
        let client = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| HttpStoreCreateError::Client(err.to_string()))?;
        Ok(Self { base_url, client })
    }

    /// The base URL of the store.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Maps a [`StoreKey`] to an HTTP [`Url`].
    ///
    /// # Errors
    /// Returns an error if the resulting URL is invalid.
    pub fn key_to_url(&self, key: &StoreKey) -> Result<Url, url::ParseError> {
        let mut url = self.base_url.as_str().trim_end_matches('/').to_string();
        url.push('/');
        url.push_str(key.as_str());
        Url::parse(&url)
    }
}

impl ReadableStorageTraits for HttpStore {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let url = self
            .key_to_url(key)
            .map_err(|err| StorageError::Other(err.to_string()))?;
        let response = self.client.get(url).send().map_err(handle_reqwest_error)?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes().map_err(handle_reqwest_error)?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(StorageError::from(format!(
                "http unexpected status code: {status}"
            ))),
        }
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        let url = self
            .key_to_url(key)
            .map_err(|err| StorageError::Other(err.to_string()))?;
        let response = self.client.head(url).send().map_err(handle_reqwest_error)?;
        match response.status() {
            StatusCode::OK => {
                let length = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|header_value| header_value.to_str().ok())
                    .and_then(|header_str| u64::from_str(header_str).ok())
                    .ok_or_else(|| StorageError::from("content length response is invalid"))?;
                Ok(Some(length))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(StorageError::from(format!(
                "http size_key has status code {status}"
            ))),
        }
    }
}

/// An HTTP store creation error.
#[derive(Debug, Error)]
pub enum HttpStoreCreateError {
    /// The URL is not valid.
    #[error("base URL {0} is not valid")]
    InvalidBaseUrl(String),
    /// A storage option is not a valid header name or value.
    #[error("storage option {0} is not a valid http header")]
    InvalidOption(String),
    /// The HTTP client could not be constructed.
    #[error("{0}")]
    Client(String),
}
