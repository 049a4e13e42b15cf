// ── NetworkManager helpers ──
//
// Thin wrappers over `nmcli -t` (terse) output, where fields are
// separated by `:` and literal colons are escaped as `\:`.

use crate::error::CoreError;
use crate::system::CommandRunner;

/// Split one terse line into fields, unescaping `\:` and `\\`.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Names of all saved connection profiles.
pub async fn connection_names(runner: &dyn CommandRunner) -> Result<Vec<String>, CoreError> {
    let output = runner
        .run_checked("nmcli", &["-t", "-f", "NAME", "connection", "show"])
        .await?;
    Ok(output
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|l| split_terse(l).into_iter().next())
        .collect())
}

pub async fn delete_connection(runner: &dyn CommandRunner, name: &str) -> Result<(), CoreError> {
    runner
        .run_checked("nmcli", &["connection", "delete", name])
        .await
        .map(|_| ())
}

/// `GENERAL.STATE` of a device, e.g. `100 (connected)`.
pub async fn device_state(runner: &dyn CommandRunner, device: &str) -> Result<String, CoreError> {
    let output = runner
        .run_checked("nmcli", &["-t", "-f", "GENERAL.STATE", "device", "show", device])
        .await?;
    Ok(output
        .lines()
        .find_map(|l| l.strip_prefix("GENERAL.STATE:"))
        .unwrap_or_default()
        .trim()
        .to_owned())
}

/// NetworkManager device state 100 is "activated".
pub fn is_connected_state(state: &str) -> bool {
    state.starts_with("100")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terse_unescaping() {
        assert_eq!(
            split_terse(r"*:Cafe\: Guest:78:WPA2:6"),
            vec!["*", "Cafe: Guest", "78", "WPA2", "6"]
        );
        assert_eq!(split_terse(""), vec![""]);
    }

    #[test]
    fn connected_state() {
        assert!(is_connected_state("100 (connected)"));
        assert!(!is_connected_state("30 (disconnected)"));
    }
}
