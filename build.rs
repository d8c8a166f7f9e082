use core::str;
use git2::{Repository, StatusOptions};
use std::env;

/// Stamp the build with a short git sha (plus a `+` if the tree is dirty), falling back to
/// "unknown" when not built from a git checkout.
fn git_version() -> Option<String> {
    let repo = Repository::discover(env::var("CARGO_MANIFEST_DIR").ok()?).ok()?;
    let head_obj = repo.revparse_single("HEAD").ok()?;
    let short_sha_buf = head_obj.short_id().ok()?;
    let short_sha = str::from_utf8(&short_sha_buf).ok()?;
    let mut status_options = StatusOptions::default();
    let statuses = repo.statuses(Some(&mut status_options)).ok()?;
    let dirty = statuses.iter().any(|st| !st.status().is_ignored());
    Some(format!("{short_sha}{}", if dirty { "+" } else { "" }))
}

fn main() {
    let version = git_version().unwrap_or_else(|| "unknown".to_string());
    println!("cargo::rustc-env=GIT_SHORT_SHA={version}");

    println!("cargo::rerun-if-changed=build.rs");
    println!("cargo::rerun-if-changed=.git/HEAD");
}
