//! Numeric ids travel as JSON strings (`"42"`). These helpers accept either
//! form; an empty string decodes to `0`, which callers reject as "absent".

use serde::{de, Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

fn to_id<E: de::Error>(raw: RawId) -> Result<i64, E> {
    match raw {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(0);
            }
            trimmed
                .parse::<i64>()
                .map_err(|_| E::custom(format!("invalid id {s:?}")))
        }
    }
}

pub fn one<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    to_id(RawId::deserialize(deserializer)?)
}

pub fn many<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<RawId>::deserialize(deserializer)?
        .into_iter()
        .map(to_id)
        .collect()
}
