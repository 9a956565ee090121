//! Hash domain lock tests.
//!
//! Proves:
//! 1. The domain set has the expected size (a new domain must be counted here)
//! 2. Separator bytes are unique and null-terminated
//! 3. Every separator reads `EVIDENTIA::<NAME>::V1\0`
//! 4. No production source outside `hash_domain.rs` spells a raw separator
//! 5. The same bytes hash differently under every domain

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use evidentia_kernel::proof::hash::{canonical_hash, HashDomain};

const AUTHORITY_FILE: &str = "hash_domain.rs";

// --- Domain set ---

#[test]
fn domain_count() {
    assert_eq!(
        HashDomain::ALL.len(),
        11,
        "domain added or removed; update this count"
    );
}

#[test]
fn separators_unique_and_terminated() {
    let mut seen = BTreeSet::new();
    for domain in HashDomain::ALL {
        assert!(seen.insert(domain.as_bytes()), "duplicate separator: {domain}");
        assert_eq!(domain.as_bytes().last(), Some(&0), "{domain} not null-terminated");
    }
}

#[test]
fn separators_follow_naming() {
    for domain in HashDomain::ALL {
        let text = std::str::from_utf8(domain.as_bytes()).expect("separator is ASCII");
        let name = text
            .strip_prefix("EVIDENTIA::")
            .and_then(|rest| rest.strip_suffix("::V1\0"))
            .unwrap_or_else(|| panic!("{domain} separator {text:?} is off-pattern"));
        assert!(
            !name.is_empty() && name.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
            "{domain} name {name:?}"
        );
    }
}

#[test]
fn domains_separate() {
    let digests: BTreeSet<String> = HashDomain::ALL
        .iter()
        .map(|d| canonical_hash(*d, b"evidence").as_str().to_string())
        .collect();
    assert_eq!(digests.len(), HashDomain::ALL.len());
}

// --- Source scan ---

fn rust_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = std::fs::read_dir(dir).unwrap_or_else(|e| panic!("{}: {e}", dir.display()));
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            rust_files(&path, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            out.push(path);
        }
    }
}

/// Lines before the first `#[cfg(test)]`, minus comments.
fn production_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, l)| !l.contains("#[cfg(test)]"))
        .filter(|(_, l)| !l.trim_start().starts_with("//"))
}

#[test]
fn no_raw_separators_outside_authority() {
    let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let mut files = Vec::new();
    for krate in ["kernel", "detect", "harness"] {
        rust_files(&workspace.join(krate).join("src"), &mut files);
    }
    assert!(files.iter().any(|f| f.ends_with(AUTHORITY_FILE)));

    let mut violations = Vec::new();
    for file in files.iter().filter(|f| !f.ends_with(AUTHORITY_FILE)) {
        let source = std::fs::read_to_string(file).expect("source is UTF-8");
        for (i, line) in production_lines(&source) {
            if line.contains("b\"EVIDENTIA::") {
                violations.push(format!("  {}:{}: {}", file.display(), i + 1, line.trim()));
            }
        }
    }
    assert!(
        violations.is_empty(),
        "raw separators outside {AUTHORITY_FILE}:\n{}",
        violations.join("\n")
    );
}
