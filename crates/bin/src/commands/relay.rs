//! Relay-password command - forwards a locally changed password to the authority.
//!
//! Meant to be called from a PAM `pam_exec expose_authtok` hook, which writes
//! the new password to stdin.

use edgedir::edge::AuthorityClient;
use tokio::io::AsyncReadExt;
use zeroize::Zeroizing;

use crate::cli::RelayArgs;

/// Strip the terminator PAM or a shell pipe leaves after the password.
fn trim_password(raw: &str) -> &str {
    raw.trim_end_matches(['\0', '\n', '\r'])
}

/// Run the relay command
pub async fn run(args: &RelayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut raw = Zeroizing::new(String::new());
    tokio::io::stdin().read_to_string(&mut raw).await?;
    let password = Zeroizing::new(trim_password(&raw).to_string());
    if password.is_empty() {
        return Err("no password on stdin".into());
    }

    let mut client = AuthorityClient::new(args.authority_url.clone());
    if let Some(host) = &args.edge_host {
        client = client.with_edge_host(host.clone());
    }

    let response = client
        .relay_password_change(&args.username, password)
        .await?;
    println!("{}", response.message);
    Ok(())
}
