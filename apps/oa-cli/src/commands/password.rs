// password.rs — Generate a password for the encrypted backend.

use super::Output;

pub fn execute(out: &Output) -> anyhow::Result<()> {
    let password = oa_storage::generate_password()?;
    out.emit(&serde_json::json!({ "password": password }), || {
        println!("{}", password);
        eprintln!("Export it as the variable named by `password_env` (default OA_STATE_PASSWORD).");
    })
}
