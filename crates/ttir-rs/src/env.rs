use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

static TTIR_OUTPUT_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();
static TTIR_MODULE_DUMP: OnceLock<bool> = OnceLock::new();
static TTIR_TARGETS: OnceLock<Option<Vec<String>>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// `TTIR_OUTPUT_DIR`: default artifact directory.
pub fn output_dir() -> Option<PathBuf> {
    TTIR_OUTPUT_DIR
        .get_or_init(|| match env::var("TTIR_OUTPUT_DIR") {
            Ok(value) if !value.trim().is_empty() => Some(PathBuf::from(value.trim())),
            _ => None,
        })
        .clone()
}

/// `TTIR_MODULE_DUMP`: force text dumps for every case.
pub fn module_dump_enabled() -> bool {
    *TTIR_MODULE_DUMP.get_or_init(|| match env::var("TTIR_MODULE_DUMP") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// `TTIR_TARGETS`: comma separated target override, e.g. `ttnn,ttmetal`.
pub fn targets_override() -> Option<Vec<String>> {
    TTIR_TARGETS
        .get_or_init(|| match env::var("TTIR_TARGETS") {
            Ok(value) => {
                let targets = parse_list(&value);
                (!targets.is_empty()).then_some(targets)
            }
            Err(_) => None,
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_and_list_parsing() {
        assert!(parse_bool(" On "));
        assert!(!parse_bool("0"));
        assert_eq!(parse_list("ttnn, ,ttmetal"), vec!["ttnn", "ttmetal"]);
        assert!(parse_list(" , ").is_empty());
    }
}
