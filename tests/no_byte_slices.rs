//! Guard against byte-index string slicing in `src/`.
//!
//! Message text, tool output and progress lines are arbitrary UTF-8. A
//! literal range like `text[..80]` panics when it lands inside a multi-byte
//! character, so truncation goes through `chars()` instead. Only numeric
//! literal bounds are flagged; `&buf[..n]` with a variable end is allowed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use regex::Regex;

fn rust_sources(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            rust_sources(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

#[test]
fn no_literal_range_slices_in_src() -> anyhow::Result<()> {
    let src = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let literal_range = Regex::new(r"\[\s*\d*\s*\.\.=?\s*\d+\s*\]|\[\s*\d+\s*\.\.\s*\]")?;

    let mut files = Vec::new();
    rust_sources(&src, &mut files)?;

    let mut failures = Vec::new();
    for path in files {
        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        for (i, line) in text.lines().enumerate() {
            let code = line.split("//").next().unwrap_or("");
            if literal_range.is_match(code) {
                failures.push(format!("{}:{}: {}", path.display(), i + 1, line.trim()));
            }
        }
    }

    anyhow::ensure!(
        failures.is_empty(),
        "literal-range slices found (use chars().take(n)):\n{}",
        failures.join("\n")
    );
    Ok(())
}
