use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use super::xmlrpc::{self, Value};
use super::{ApiError, ApiResult, ContentApi};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{FileRecord, PageMeta, PageRecord, PostRecord};

/// XML-RPC client for the Wikidot API, authenticated with user + API key.
pub struct WikidotClient {
    client: Client,
    endpoint: String,
    user: String,
    key: String,
    interval: Duration,
}

impl WikidotClient {
    pub fn new(config: &Config) -> Result<Self> {
        let (Some(user), Some(key)) = (config.api_user.clone(), config.api_key.clone()) else {
            return Err(AppError::Config("API credentials are missing".to_string()));
        };

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("wikidot-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.api_url.clone(),
            user,
            key,
            interval: config.request_interval(),
        })
    }

    async fn call(&self, method: &str, args: Value) -> ApiResult<Value> {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        tracing::debug!("Calling {}", method);

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.key))
            .header(CONTENT_TYPE, "text/xml")
            .body(xmlrpc::encode_call(method, &[args]))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }

        let body = response.text().await?;
        xmlrpc::decode_response(&body)
    }
}

#[async_trait]
impl ContentApi for WikidotClient {
    async fn list_pages(&self, site: &str) -> ApiResult<Vec<String>> {
        let value = self
            .call("pages.select", Value::record([("site", Value::from(site))]))
            .await?;
        string_list(&value)
    }

    async fn pages_meta(&self, site: &str, pages: &[String]) -> ApiResult<HashMap<String, PageMeta>> {
        let value = self
            .call(
                "pages.get_meta",
                Value::record([("site", Value::from(site)), ("pages", Value::from(pages))]),
            )
            .await?;
        keyed(&value, |_, v| page_meta(v))
    }

    async fn page(&self, site: &str, fullname: &str) -> ApiResult<PageRecord> {
        let value = self
            .call(
                "pages.get_one",
                Value::record([("site", Value::from(site)), ("page", Value::from(fullname))]),
            )
            .await?;
        page_record(fullname, &value)
    }

    async fn categories(&self, site: &str) -> ApiResult<Vec<String>> {
        let value = self
            .call("categories.select", Value::record([("site", Value::from(site))]))
            .await?;
        string_list(&value)
    }

    async fn list_files(&self, site: &str, page: &str) -> ApiResult<Vec<String>> {
        let value = self
            .call(
                "files.select",
                Value::record([("site", Value::from(site)), ("page", Value::from(page))]),
            )
            .await?;
        string_list(&value)
    }

    async fn files_meta(
        &self,
        site: &str,
        page: &str,
        files: &[String],
    ) -> ApiResult<HashMap<String, FileRecord>> {
        let value = self
            .call(
                "files.get_meta",
                Value::record([
                    ("site", Value::from(site)),
                    ("page", Value::from(page)),
                    ("files", Value::from(files)),
                ]),
            )
            .await?;
        keyed(&value, file_record)
    }

    async fn list_posts(&self, site: &str, page: &str) -> ApiResult<Vec<String>> {
        let value = self
            .call(
                "posts.select",
                Value::record([("site", Value::from(site)), ("page", Value::from(page))]),
            )
            .await?;
        string_list(&value)
    }

    async fn posts(&self, site: &str, ids: &[String]) -> ApiResult<HashMap<String, PostRecord>> {
        let value = self
            .call(
                "posts.get",
                Value::record([("site", Value::from(site)), ("posts", Value::from(ids))]),
            )
            .await?;
        keyed(&value, post_record)
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::to_text)
}

fn int(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

fn string_list(value: &Value) -> ApiResult<Vec<String>> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::to_text).collect())
        .ok_or_else(|| ApiError::Decode("expected an array".to_string()))
}

fn keyed<T, F>(value: &Value, convert: F) -> ApiResult<HashMap<String, T>>
where
    F: Fn(&str, &Value) -> T,
{
    let members = value
        .as_struct()
        .ok_or_else(|| ApiError::Decode("expected a struct keyed by identifier".to_string()))?;
    Ok(members
        .iter()
        .map(|(key, v)| (key.clone(), convert(key, v)))
        .collect())
}

fn page_meta(value: &Value) -> PageMeta {
    PageMeta {
        updated_at: text(value, "updated_at"),
        revisions: int(value, "revisions"),
        tags: value
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::to_text).collect())
            .unwrap_or_default(),
    }
}

fn page_record(fullname: &str, value: &Value) -> ApiResult<PageRecord> {
    if value.as_struct().is_none() {
        return Err(ApiError::Decode(format!("page '{}' is not a struct", fullname)));
    }

    Ok(PageRecord {
        fullname: text(value, "fullname").unwrap_or_else(|| fullname.to_string()),
        title: text(value, "title"),
        created_at: text(value, "created_at"),
        created_by: text(value, "created_by"),
        updated_at: text(value, "updated_at"),
        updated_by: text(value, "updated_by"),
        parent_fullname: text(value, "parent_fullname"),
        parent_title: text(value, "parent_title"),
        rating: int(value, "rating").unwrap_or(0),
        revisions: int(value, "revisions").unwrap_or(0),
        children: int(value, "children").unwrap_or(0),
        comments: int(value, "comments").unwrap_or(0),
        commented_at: text(value, "commented_at"),
        commented_by: text(value, "commented_by"),
        content: text(value, "content"),
        html: text(value, "html"),
    })
}

fn file_record(name: &str, value: &Value) -> FileRecord {
    FileRecord {
        name: name.to_string(),
        size: int(value, "size"),
        comment: text(value, "comment"),
        mime_type: text(value, "mime_type"),
        mime_description: text(value, "mime_description"),
        uploaded_by: text(value, "uploaded_by"),
        uploaded_at: text(value, "uploaded_at"),
        download_url: text(value, "download_url"),
    }
}

fn post_record(id: &str, value: &Value) -> PostRecord {
    PostRecord {
        id: id.to_string(),
        reply_to: text(value, "reply_to"),
        title: text(value, "title"),
        content: text(value, "content"),
        html: text(value, "html"),
        created_by: text(value, "created_by"),
        created_at: text(value, "created_at"),
        replies: int(value, "replies").unwrap_or(0),
    }
}
