use anyhow::Result;

use crate::config::{Config, Session};

pub(crate) fn cmd_account_login(
    config: &Config,
    owner_id: &str,
    access_token: &str,
    json: bool,
) -> Result<()> {
    let session = Session {
        owner_id: owner_id.to_string(),
        access_token: access_token.to_string(),
    };
    config.save_session(&session)?;

    if json {
        println!("{}", serde_json::json!({ "owner_id": owner_id }));
    } else {
        println!("Signed in as {owner_id}");
    }
    Ok(())
}

pub(crate) fn cmd_account_logout(config: &Config, json: bool) -> Result<()> {
    let removed = config.clear_session()?;
    if json {
        println!("{}", serde_json::json!({ "signed_out": removed }));
    } else if removed {
        println!("Signed out");
    } else {
        eprintln!("Not signed in");
    }
    Ok(())
}

pub(crate) fn cmd_account_show(config: &Config, json: bool) -> Result<()> {
    match config.load_session()? {
        Some(session) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "owner_id": session.owner_id })
                );
            } else {
                println!("Signed in as {}", session.owner_id);
            }
        }
        None => {
            if json {
                println!("{}", serde_json::json!({ "owner_id": null }));
            } else {
                eprintln!("Not signed in. Use `nibble account login <owner-id> <token>`.");
            }
        }
    }
    Ok(())
}
