//! Lossless serde form for floats that may be infinite or NaN.
//!
//! JSON has no literal for non-finite numbers and `serde_json` writes them as
//! `null`, which reads back as a different value. Finite values stay numbers;
//! the rest become the strings `"inf"`, `"-inf"` and `"NaN"`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(f64),
    Text(String),
}

impl From<f64> for Repr {
    fn from(x: f64) -> Self {
        if x.is_finite() {
            Repr::Number(x)
        } else if x.is_nan() {
            Repr::Text("NaN".into())
        } else if x > 0.0 {
            Repr::Text("inf".into())
        } else {
            Repr::Text("-inf".into())
        }
    }
}

impl Repr {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Repr::Number(x) => Ok(x),
            Repr::Text(text) => match text.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(E::custom(format!("invalid float {:?}", other))),
            },
        }
    }
}

pub(crate) fn serialize<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    Repr::from(*x).serialize(serializer)
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Repr::deserialize(deserializer)?.into_f64()
}

pub(crate) mod option {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        x: &Option<f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        x.map(Repr::from).serialize(serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<f64>, D::Error> {
        Option::<Repr>::deserialize(deserializer)?
            .map(Repr::into_f64::<D::Error>)
            .transpose()
    }
}
