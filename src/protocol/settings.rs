use std::{fmt, str::FromStr};

use super::messages::ParseError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SettingType {
    Text,
    Number,
    Enum,
    Switch,
}

impl FromStr for SettingType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(SettingType::Text),
            "NUMBER" => Ok(SettingType::Number),
            "ENUM" => Ok(SettingType::Enum),
            "SWITCH" => Ok(SettingType::Switch),
            _ => Err(ParseError::SettingType(s.to_owned())),
        }
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingType::Text => write!(f, "TEXT"),
            SettingType::Number => write!(f, "NUMBER"),
            SettingType::Enum => write!(f, "ENUM"),
            SettingType::Switch => write!(f, "SWITCH"),
        }
    }
}

/// A configurable value of the remote server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub description: String,

    /// Server-defined hint, e.g. the choices of an enumerated setting.
    pub possible_values: String,

    pub kind: SettingType,
}

impl Setting {
    const FIELD_SEPARATOR: char = ';';
    const FIELDS: usize = 5;

    /// Parses a settings listing reply.
    ///
    /// The reply is a flat `;`-separated list with five fields per setting:
    /// `key;value;description;possible values;type`. A trailing incomplete
    /// group is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::SettingType`] for an unknown type field.
    pub fn parse_list(payload: &str) -> Result<Vec<Self>, ParseError> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        let fields: Vec<&str> = payload.split(Self::FIELD_SEPARATOR).collect();
        fields
            .chunks_exact(Self::FIELDS)
            .map(|group| {
                Ok(Self {
                    key: group[0].to_owned(),
                    value: group[1].to_owned(),
                    description: group[2].to_owned(),
                    possible_values: group[3].to_owned(),
                    kind: group[4].parse()?,
                })
            })
            .collect()
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Setting[{}]: {}={}", self.kind, self.key, self.value)
    }
}
