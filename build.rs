use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Stamps `soundboard --version` with the commit it was built from, marked
/// `-dirty` when tracked files were modified. Packagers building outside a
/// checkout set `SOUNDBOARD_BUILD` instead.
fn main() {
    println!("cargo:rerun-if-env-changed=SOUNDBOARD_BUILD");

    let build = match std::env::var("SOUNDBOARD_BUILD") {
        Ok(build) if !build.trim().is_empty() => build,
        _ => match git(&["rev-parse", "--short", "HEAD"]) {
            Some(sha) => {
                let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                    .is_some_and(|s| !s.is_empty());
                if dirty {
                    format!("{sha}-dirty")
                } else {
                    sha
                }
            }
            None => "dev".to_string(),
        },
    };
    println!("cargo:rustc-env=SOUNDBOARD_BUILD={build}");

    println!("cargo:rerun-if-changed=.git/HEAD");
    if let Some(head_ref) = git(&["symbolic-ref", "-q", "HEAD"]) {
        println!("cargo:rerun-if-changed=.git/{head_ref}");
    }
}
