use anyhow::Result;
use vergen::EmitBuilder;

fn main() -> Result<()> {
    // optionally emit git branch and hash for the version banner
    let _ = EmitBuilder::builder()
        .git_branch()
        .git_sha(true)
        // we ignore the "fail" part
        .fail_on_error()
        .quiet()
        .emit();

    Ok(())
}
