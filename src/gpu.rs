use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::LaunchError;

/// Requested GPU devices.
///
/// The `gpus` flag has two historic shapes: a device count (`2` means
/// devices `0` and `1`) and an explicit list of device ids (`"0 3"`).
/// Both collapse into this type. A lone integer is a count; a comma
/// marks an id list, so `"1,"` pins device 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GpuSpecRepr", into = "GpuSpecRepr")]
pub enum GpuSpec {
    #[default]
    None,
    Count(usize),
    Ids(Vec<usize>),
}

impl GpuSpec {
    /// Device ids the spec resolves to
    pub fn device_ids(&self) -> Vec<usize> {
        match self {
            GpuSpec::None => Vec::new(),
            GpuSpec::Count(n) => (0..*n).collect(),
            GpuSpec::Ids(ids) => ids.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self {
            GpuSpec::None => 0,
            GpuSpec::Count(n) => *n,
            GpuSpec::Ids(ids) => ids.len(),
        }
    }
}

/// Render ids the way `CUDA_VISIBLE_DEVICES` expects them
pub fn visible_devices(ids: &[usize]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl FromStr for GpuSpec {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| LaunchError::InvalidGpuSpec {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let tokens: Vec<&str> = s
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();

        let parse_token = |token: &str| {
            token
                .parse::<usize>()
                .map_err(|_| invalid(&format!("'{}' is not a device number", token)))
        };

        let ids = tokens
            .iter()
            .map(|t| parse_token(*t))
            .collect::<Result<Vec<_>, _>>()?;

        if ids.is_empty() {
            return Ok(GpuSpec::None);
        }
        if ids.len() == 1 && !s.contains(',') {
            return Ok(match ids[0] {
                0 => GpuSpec::None,
                n => GpuSpec::Count(n),
            });
        }

        let unique: BTreeSet<_> = ids.iter().collect();
        if unique.len() != ids.len() {
            return Err(invalid("device ids must be unique"));
        }
        Ok(GpuSpec::Ids(ids))
    }
}

impl fmt::Display for GpuSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuSpec::None => write!(f, "0"),
            GpuSpec::Count(n) => write!(f, "{}", n),
            GpuSpec::Ids(ids) if ids.len() == 1 => write!(f, "{},", ids[0]),
            GpuSpec::Ids(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{}", ids.join(" "))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum GpuSpecRepr {
    Count(usize),
    Ids(Vec<usize>),
    Text(String),
}

impl TryFrom<GpuSpecRepr> for GpuSpec {
    type Error = LaunchError;

    fn try_from(repr: GpuSpecRepr) -> Result<Self, Self::Error> {
        match repr {
            GpuSpecRepr::Count(0) => Ok(GpuSpec::None),
            GpuSpecRepr::Count(n) => Ok(GpuSpec::Count(n)),
            GpuSpecRepr::Ids(ids) if ids.is_empty() => Ok(GpuSpec::None),
            GpuSpecRepr::Ids(ids) => {
                let unique: BTreeSet<_> = ids.iter().collect();
                if unique.len() != ids.len() {
                    return Err(LaunchError::InvalidGpuSpec {
                        spec: format!("{:?}", ids),
                        reason: "device ids must be unique".to_string(),
                    });
                }
                Ok(GpuSpec::Ids(ids))
            }
            GpuSpecRepr::Text(text) => text.parse(),
        }
    }
}

impl From<GpuSpec> for GpuSpecRepr {
    fn from(spec: GpuSpec) -> Self {
        match spec {
            GpuSpec::None => GpuSpecRepr::Count(0),
            GpuSpec::Count(n) => GpuSpecRepr::Count(n),
            GpuSpec::Ids(ids) => GpuSpecRepr::Ids(ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count() {
        let spec: GpuSpec = "2".parse().unwrap();
        assert_eq!(spec, GpuSpec::Count(2));
        assert_eq!(spec.device_ids(), vec![0, 1]);
    }

    #[test]
    fn test_parse_zero_and_empty_mean_cpu() {
        assert_eq!("0".parse::<GpuSpec>().unwrap(), GpuSpec::None);
        assert_eq!("".parse::<GpuSpec>().unwrap(), GpuSpec::None);
        assert_eq!("   ".parse::<GpuSpec>().unwrap(), GpuSpec::None);
        assert!(GpuSpec::None.is_empty());
    }

    #[test]
    fn test_parse_id_list() {
        let spec: GpuSpec = "0 3".parse().unwrap();
        assert_eq!(spec, GpuSpec::Ids(vec![0, 3]));
        assert_eq!(spec.len(), 2);

        let spec: GpuSpec = "1,2".parse().unwrap();
        assert_eq!(spec.device_ids(), vec![1, 2]);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("-1".parse::<GpuSpec>().is_err());
        assert!("a b".parse::<GpuSpec>().is_err());
        assert!("1 1".parse::<GpuSpec>().is_err());
    }

    #[test]
    fn test_json_forms() {
        let spec: GpuSpec = serde_json::from_str("2").unwrap();
        assert_eq!(spec, GpuSpec::Count(2));

        let spec: GpuSpec = serde_json::from_str("\"0 2\"").unwrap();
        assert_eq!(spec, GpuSpec::Ids(vec![0, 2]));

        let spec: GpuSpec = serde_json::from_str("[1]").unwrap();
        assert_eq!(spec, GpuSpec::Ids(vec![1]));

        assert!(serde_json::from_str::<GpuSpec>("[1, 1]").is_err());
    }

    #[test]
    fn test_display_and_visible_devices() {
        assert_eq!(GpuSpec::Ids(vec![0, 3]).to_string(), "0 3");
        assert_eq!(GpuSpec::None.to_string(), "0");
        assert_eq!(visible_devices(&[0, 3]), "0,3");
    }

    #[test]
    fn test_single_id_survives_text_form() {
        let single = GpuSpec::Ids(vec![1]);
        assert_eq!(single.to_string(), "1,");
        assert_eq!(single.to_string().parse::<GpuSpec>().unwrap(), single);
        assert_eq!(single.device_ids(), vec![1]);

        for spec in [GpuSpec::None, GpuSpec::Count(2), GpuSpec::Ids(vec![0, 3])] {
            assert_eq!(spec.to_string().parse::<GpuSpec>().unwrap(), spec);
        }
    }
}
