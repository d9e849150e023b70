//! Cloud-init glue: injecting env-var and SSH-key files into the guest
//! boot environment. Generating a
//! NoCloud ISO or meta-data document is out of scope — that synthesis, if
//! any, happens inside the opaque `Hypervisor` backend.

use std::collections::HashMap;

use virt_driver_hypervisor::types::GuestFile;

/// Destination path for the injected env-var file, mounted alongside the
/// task's other guest files.
pub const ENV_FILE_DEST: &str = "/etc/virt-driver/env";
/// Destination path for the injected SSH authorized_keys file.
pub const AUTHORIZED_KEYS_DEST: &str = "/etc/virt-driver/authorized_keys";

/// Builds the small set of files (`env` file of `KEY=VALUE` lines,
/// `authorized_keys` file) that get attached to the hypervisor config's
/// mount/extra-files list. Returns an empty vec for a given piece when
/// there is nothing to inject, so the caller never attaches an empty file.
pub fn build_guest_files(env: &HashMap<String, String>, ssh_keys: &[String]) -> Vec<GuestFile> {
    let mut files = Vec::new();

    if !env.is_empty() {
        let mut keys: Vec<&String> = env.keys().collect();
        keys.sort();
        let contents = keys
            .into_iter()
            .map(|k| format!("{k}={}", env[k]))
            .collect::<Vec<_>>()
            .join("\n");
        files.push(GuestFile { dest: ENV_FILE_DEST.to_string(), contents: format!("{contents}\n") });
    }

    if !ssh_keys.is_empty() {
        let contents = format!("{}\n", ssh_keys.join("\n"));
        files.push(GuestFile { dest: AUTHORIZED_KEYS_DEST.to_string(), contents });
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_env_and_keys_produce_no_files() {
        assert!(build_guest_files(&HashMap::new(), &[]).is_empty());
    }

    #[test]
    fn env_file_is_sorted_key_value_lines() {
        let mut env = HashMap::new();
        env.insert("ZETA".to_string(), "1".to_string());
        env.insert("ALPHA".to_string(), "2".to_string());
        let files = build_guest_files(&env, &[]);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].dest, ENV_FILE_DEST);
        assert_eq!(files[0].contents, "ALPHA=2\nZETA=1\n");
    }

    #[test]
    fn ssh_keys_file_is_newline_joined() {
        let files = build_guest_files(&HashMap::new(), &["ssh-ed25519 AAA".to_string(), "ssh-ed25519 BBB".to_string()]);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].dest, AUTHORIZED_KEYS_DEST);
        assert_eq!(files[0].contents, "ssh-ed25519 AAA\nssh-ed25519 BBB\n");
    }
}
