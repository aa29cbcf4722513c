//! Request payload descriptions and their conversion into transport entities.
//!
//! A [`BodyContent`] says *what* a request carries. Turning it into bytes on
//! the wire goes through an [`EntityConverter`], so the variants never branch
//! on which HTTP backend is in use.

use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Content type used for `Object` bodies unless overridden.
pub const APPLICATION_JSON: &str = "application/json";

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Anything that can be rendered to a JSON value at conversion time.
///
/// Implemented for every `Serialize + Send + Sync` type.
pub trait JsonSource: Send + Sync {
    fn to_json_value(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T> JsonSource for T
where
    T: Serialize + Send + Sync,
{
    fn to_json_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// The payload of a request.
///
/// # Examples
///
/// ```
/// use restkeep::BodyContent;
/// use std::collections::BTreeMap;
///
/// let login = BodyContent::form(BTreeMap::from([
///     ("username".to_string(), "alice".to_string()),
/// ]));
/// let note = BodyContent::text("hello", "text/plain");
/// let item = BodyContent::object(serde_json::json!({ "name": "widget" }));
/// # let _ = (login, note, item);
/// ```
#[derive(Clone)]
pub enum BodyContent {
    /// The contents of a file, sent as-is.
    File {
        path: PathBuf,
        content_type: String,
    },
    /// A string payload.
    Text {
        payload: String,
        content_type: String,
    },
    /// A url-encoded form.
    Form {
        fields: BTreeMap<String, String>,
        charset: String,
    },
    /// A `multipart/form-data` body of file parts and text parts.
    Multipart {
        files: BTreeMap<String, PathBuf>,
        fields: BTreeMap<String, String>,
    },
    /// An arbitrary object, serialized to JSON when the entity is created.
    Object {
        value: Arc<dyn JsonSource>,
        content_type: String,
    },
    /// A ready-made entity passed through untouched.
    Prebuilt(Entity),
}

impl BodyContent {
    pub fn file(path: impl Into<PathBuf>, content_type: impl Into<String>) -> Self {
        BodyContent::File {
            path: path.into(),
            content_type: content_type.into(),
        }
    }

    pub fn text(payload: impl Into<String>, content_type: impl Into<String>) -> Self {
        BodyContent::Text {
            payload: payload.into(),
            content_type: content_type.into(),
        }
    }

    /// A UTF-8 url-encoded form.
    pub fn form(fields: BTreeMap<String, String>) -> Self {
        Self::form_with_charset(fields, crate::request::DEFAULT_CHARSET)
    }

    pub fn form_with_charset(fields: BTreeMap<String, String>, charset: impl Into<String>) -> Self {
        BodyContent::Form {
            fields,
            charset: charset.into(),
        }
    }

    pub fn multipart(files: BTreeMap<String, PathBuf>, fields: BTreeMap<String, String>) -> Self {
        BodyContent::Multipart { files, fields }
    }

    /// An object sent as `application/json`.
    pub fn object<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self::object_with_content_type(value, APPLICATION_JSON)
    }

    pub fn object_with_content_type<T>(value: T, content_type: impl Into<String>) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        BodyContent::Object {
            value: Arc::new(value),
            content_type: content_type.into(),
        }
    }

    pub fn prebuilt(entity: Entity) -> Self {
        BodyContent::Prebuilt(entity)
    }

    /// Short variant name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BodyContent::File { .. } => "file",
            BodyContent::Text { .. } => "text",
            BodyContent::Form { .. } => "form",
            BodyContent::Multipart { .. } => "multipart",
            BodyContent::Object { .. } => "object",
            BodyContent::Prebuilt(_) => "prebuilt",
        }
    }

    /// Produces a transport entity through `converter`.
    ///
    /// `charset` is the request's body-encoding charset; it is added to text
    /// content types that do not already declare one. Form bodies carry
    /// their own charset.
    ///
    /// # Errors
    ///
    /// Fails if a file cannot be read or an object cannot be serialized.
    pub async fn create_entity<C>(&self, charset: &str, converter: &C) -> Result<C::Output>
    where
        C: EntityConverter + Sync,
    {
        match self {
            BodyContent::File { path, content_type } => {
                let data = tokio::fs::read(path).await?;
                converter.bytes(Bytes::from(data), Some(content_type))
            }
            BodyContent::Text {
                payload,
                content_type,
            } => {
                let content_type = with_charset(content_type, charset);
                converter.bytes(Bytes::from(payload.clone()), Some(&content_type))
            }
            BodyContent::Form { fields, charset } => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter())
                    .finish();
                let content_type = format!("{}; charset={}", FORM_URLENCODED, charset);
                converter.bytes(Bytes::from(encoded), Some(&content_type))
            }
            BodyContent::Multipart { files, fields } => {
                let mut parts = Vec::with_capacity(files.len() + fields.len());
                for (name, path) in files {
                    let data = tokio::fs::read(path).await?;
                    parts.push(MultipartPart {
                        name: name.clone(),
                        file_name: file_name(path),
                        content_type: None,
                        data: Bytes::from(data),
                    });
                }
                for (name, value) in fields {
                    parts.push(MultipartPart::text(name.clone(), value.clone()));
                }
                converter.multipart(strip_part_content_types(parts))
            }
            BodyContent::Object {
                value,
                content_type,
            } => {
                let json = value
                    .to_json_value()
                    .and_then(|value| serde_json::to_vec(&value))
                    .map_err(|e| Error::SerializationFailed(e.to_string()))?;
                let content_type = with_charset(content_type, charset);
                converter.bytes(Bytes::from(json), Some(&content_type))
            }
            BodyContent::Prebuilt(entity) => converter.passthrough(entity),
        }
    }
}

impl fmt::Debug for BodyContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyContent::File { path, content_type } => f
                .debug_struct("File")
                .field("path", path)
                .field("content_type", content_type)
                .finish(),
            BodyContent::Text {
                payload,
                content_type,
            } => f
                .debug_struct("Text")
                .field("len", &payload.len())
                .field("content_type", content_type)
                .finish(),
            BodyContent::Form { fields, charset } => f
                .debug_struct("Form")
                .field("fields", &fields.keys().collect::<Vec<_>>())
                .field("charset", charset)
                .finish(),
            BodyContent::Multipart { files, fields } => f
                .debug_struct("Multipart")
                .field("files", files)
                .field("fields", &fields.keys().collect::<Vec<_>>())
                .finish(),
            BodyContent::Object { content_type, .. } => f
                .debug_struct("Object")
                .field("content_type", content_type)
                .finish_non_exhaustive(),
            BodyContent::Prebuilt(entity) => f.debug_tuple("Prebuilt").field(entity).finish(),
        }
    }
}

fn with_charset(content_type: &str, charset: &str) -> String {
    if content_type.to_ascii_lowercase().contains("charset=") {
        content_type.to_string()
    } else {
        format!("{}; charset={}", content_type, charset)
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

/// Drops any per-part content type.
///
/// Some servers reject multipart parts that carry a `Content-Type` header, so
/// parts are always written without one.
pub(crate) fn strip_part_content_types(parts: Vec<MultipartPart>) -> Vec<MultipartPart> {
    parts
        .into_iter()
        .map(|mut part| {
            if let Some(content_type) = part.content_type.take() {
                tracing::trace!(
                    part = %part.name,
                    content_type = %content_type,
                    "Stripping multipart part content type"
                );
            }
            part
        })
        .collect()
}

/// A backend-neutral, fully buffered request entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    Multipart(Vec<MultipartPart>),
}

impl Entity {
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Entity::Bytes { content_type, .. } => content_type.as_deref(),
            Entity::Multipart(_) => Some("multipart/form-data"),
        }
    }
}

/// One part of a multipart entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    pub name: String,
    pub file_name: Option<String>,
    /// Always `None` once the part reaches a converter.
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl MultipartPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: Bytes::from(value.into()),
        }
    }
}

/// Turns prepared payload data into a backend-specific entity.
pub trait EntityConverter {
    type Output;

    /// A single-part body.
    fn bytes(&self, data: Bytes, content_type: Option<&str>) -> Result<Self::Output>;

    /// A multipart body. Parts arrive without content types.
    fn multipart(&self, parts: Vec<MultipartPart>) -> Result<Self::Output>;

    /// A prebuilt entity.
    fn passthrough(&self, entity: &Entity) -> Result<Self::Output>;
}

/// Converter that yields the neutral [`Entity`]; useful for inspecting what a
/// body would put on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityBuilder;

impl EntityConverter for EntityBuilder {
    type Output = Entity;

    fn bytes(&self, data: Bytes, content_type: Option<&str>) -> Result<Entity> {
        Ok(Entity::Bytes {
            data,
            content_type: content_type.map(str::to_string),
        })
    }

    fn multipart(&self, parts: Vec<MultipartPart>) -> Result<Entity> {
        Ok(Entity::Multipart(parts))
    }

    fn passthrough(&self, entity: &Entity) -> Result<Entity> {
        Ok(entity.clone())
    }
}
