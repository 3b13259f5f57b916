use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// An ID as it appears in API responses: a plain hex string, where [`Id`]
/// would serialise as MongoDB extended JSON. Request bodies can take [`Id`]
/// directly, since it deserialises from the hex form too.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String")]
pub struct ApiId(Id);

impl Debug for ApiId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiId({})", self.0)
    }
}

impl Display for ApiId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for ApiId {
    type Err = mongodb::bson::oid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<ApiId> for String {
    fn from(id: ApiId) -> Self {
        id.to_string()
    }
}

impl From<Id> for ApiId {
    fn from(id: Id) -> Self {
        Self(id)
    }
}

impl From<ApiId> for Id {
    fn from(id: ApiId) -> Self {
        id.0
    }
}

impl Deref for ApiId {
    type Target = Id;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::serde_json::{self, json};

    use super::*;

    #[test]
    fn serialises_as_hex() {
        let id = Id::new();
        let value = serde_json::to_value(ApiId::from(id)).unwrap();
        assert_eq!(value, json!(id.to_string()));
    }

    #[test]
    fn hex_deserialises_into_either_form() {
        let id = Id::new();
        let hex = json!(id.to_string());
        let api: ApiId = serde_json::from_value(hex.clone()).unwrap();
        let raw: Id = serde_json::from_value(hex).unwrap();
        assert_eq!(*api, id);
        assert_eq!(raw, id);
    }
}
