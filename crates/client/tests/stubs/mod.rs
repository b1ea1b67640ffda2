pub mod prompter_stub;
pub mod shell_stub;

pub use prompter_stub::PrompterStub;
pub use shell_stub::ShellStub;

/// An account snapshot the way `solana account --output json` writes it.
pub fn account_json(address: &str, owner: &str, lamports: u64) -> String {
    serde_json::json!({
        "pubkey": address,
        "account": {
            "lamports": lamports,
            "data": ["AAEC", "base64"],
            "owner": owner,
            "executable": false,
            "rentEpoch": 18446744073709551615u64,
            "space": 3
        }
    })
    .to_string()
}
