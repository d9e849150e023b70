//! Derives a hypervisor domain name from the scheduler's opaque task id.

use crate::error::{DriverError, Result};

/// `A/B/C` → `B-C`: drop the first `/`-separated segment (the allocation id)
/// and join the rest with `-`. Stable across plugin restarts since it is a
/// pure function of the task id.
pub fn derive_domain_name(task_id: &str) -> Result<String> {
    let mut segments = task_id.split('/');
    let _alloc_id = segments.next().filter(|s| !s.is_empty());
    let rest: Vec<&str> = segments.collect();

    if _alloc_id.is_none() || rest.is_empty() || rest.iter().any(|s| s.is_empty()) {
        return Err(DriverError::ConfigInvalid(format!("malformed task id: {task_id}")));
    }

    Ok(rest.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_first_segment_and_joins_rest() {
        assert_eq!(derive_domain_name("A/B/C").unwrap(), "B-C");
    }

    #[test]
    fn scenario_web_task() {
        assert_eq!(derive_domain_name("alloc01/web/0001").unwrap(), "web-0001");
    }

    #[test]
    fn two_segments_is_valid() {
        assert_eq!(derive_domain_name("alloc/name").unwrap(), "name");
    }

    #[test]
    fn single_segment_is_malformed() {
        assert!(derive_domain_name("alloc01").is_err());
    }

    #[test]
    fn empty_segment_is_malformed() {
        assert!(derive_domain_name("alloc01//0001").is_err());
    }
}
