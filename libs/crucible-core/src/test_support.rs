// Shared fixtures for unit tests: a shell-script stand-in for g++.
//
// The fake compiler "compiles" a shell script by copying it to the output path
// and marking it executable, so the full pipeline runs without a C++ toolchain.
// Marker comments in the source steer its behaviour.

use crate::config::ToolchainConfig;
use std::path::Path;

const FAKE_COMPILER: &str = r#"#!/bin/sh
# usage: fake-cc.sh <source> -o <binary>
src="$1"
out="$3"
if grep -q SYNTAX_ERROR "$src"; then
    echo "$src:1:1: error: expected ';' before '}' token" >&2
    exit 1
fi
if grep -q SLOW_COMPILE "$src"; then
    echo "compiling slowly..." >&2
    sleep 30
fi
if grep -q COMPILER_STDOUT "$src"; then
    echo "note: compiler chatter on stdout"
fi
if grep -q WARNING "$src"; then
    echo "$src:2:5: warning: unused variable 'x' [-Wunused-variable]" >&2
fi
cp "$src" "$out"
chmod +x "$out"
"#;

/// Toolchain invoking the fake compiler as `sh <dir>/fake-cc.sh`
pub fn fake_toolchain(dir: &Path) -> ToolchainConfig {
    let path = dir.join("fake-cc.sh");
    std::fs::write(&path, FAKE_COMPILER).expect("write fake compiler");
    ToolchainConfig {
        command: "sh".to_string(),
        flags: vec![path.to_string_lossy().into_owned()],
        ..ToolchainConfig::default()
    }
}

/// A "source file" the fake compiler turns into a runnable program
pub fn script(body: &str) -> String {
    format!("#!/bin/sh\n{}\n", body)
}
