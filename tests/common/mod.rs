//! A fake CDB backend for integration tests.
//!
//! `cdb.exe` isn't available in this environment (or on Linux CI at all),
//! so these tests drive `DebuggerAdapter`/`Session` against a tiny POSIX
//! shell script that understands just enough of the sentinel-framing
//! protocol to stand in for it: it splits each input line on `;`, echoes
//! the literal text after `.echo ` for sentinel markers, and produces a
//! deterministic canned line for any other command. That's enough to
//! exercise sentinel framing, batching, and multi-command round trips
//! without needing Windows or a real debugger.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

const SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
    echo "$line" | tr ';' '\n' | while IFS= read -r part; do
        trimmed=$(echo "$part" | sed -e 's/^[[:space:]]*//' -e 's/[[:space:]]*$//')
        case "$trimmed" in
            .echo\ *)
                echo "${trimmed#.echo }"
                ;;
            "")
                ;;
            SLOWCOMMAND)
                sleep 2
                echo "output-of: SLOWCOMMAND"
                ;;
            *)
                echo "output-of: $trimmed"
                ;;
        esac
    done
done
"#;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write the fake backend to a fresh temp file and return its path, chmod
/// +x'd. Each call gets a unique filename so concurrent tests don't race.
pub fn write_fake_cdb() -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut path = std::env::temp_dir();
    path.push(format!("mcp-nexus-fake-cdb-{}-{n}.sh", std::process::id()));

    let mut file = fs::File::create(&path).expect("create fake cdb script");
    file.write_all(SCRIPT.as_bytes()).expect("write fake cdb script");
    drop(file);

    let mut perms = fs::metadata(&path).expect("stat fake cdb script").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod fake cdb script");

    path
}
