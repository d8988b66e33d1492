//! Demonstration chain
//!
//! Three join-splits across three accounts, starting from a public deposit:
//!
//! ```text
//!   0: deposit 500 ──▶ [a0:107, a0:83, a1:204, a2:106]
//!   1: [#0.0, #0.2] ──▶ [a0:140, a2:171]
//!   2: [#0.1, #0.3] ──▶ [a0:50, a2:50]   release 89 to a1
//! ```

use anyhow::{Context, Result};

use cloak_note::AccountId;

use crate::sequencer::{Chain, ChainError, NoteRef, PublicBalanceOp, Transfer};

/// Accounts the demo runs with unless configured otherwise
pub const DEMO_ACCOUNTS: [&str; 3] = [
    "0xa9b16b8C2399510706cD275aD9F86Ef668067351",
    "0x52c7e34f94412567A8d067261Ff715389ddF5Cb6",
    "0x35F4d8747FC8c44670b0Ff53affcf5e4cEFC62D8",
];

/// Value moved into notes by the first step
pub const DEMO_DEPOSIT: u64 = 500;

/// Parse configured accounts, falling back to [`DEMO_ACCOUNTS`] when none are given
pub fn demo_accounts(configured: &[String]) -> Result<[AccountId; 3]> {
    let raw: Vec<&str> = if configured.is_empty() {
        DEMO_ACCOUNTS.to_vec()
    } else {
        configured.iter().map(String::as_str).collect()
    };
    let parsed = raw
        .iter()
        .map(|s| s.parse::<AccountId>().with_context(|| format!("Invalid account {s}")))
        .collect::<Result<Vec<_>>>()?;
    let count = parsed.len();
    parsed
        .try_into()
        .map_err(|_| anyhow::anyhow!("Demo needs exactly 3 accounts, got {count}"))
}

pub fn demo_chain(accounts: &[AccountId; 3]) -> Result<Chain, ChainError> {
    let [a0, a1, a2] = *accounts;
    Chain::new(vec![
        Transfer::new(a0)
            .output(a0, 107)
            .output(a0, 83)
            .output(a1, 204)
            .output(a2, 106)
            .public_value(-(DEMO_DEPOSIT as i64)),
        Transfer::new(a0)
            .input(NoteRef::output(0, 0))
            .input(NoteRef::output(0, 2))
            .output(a0, 140)
            .output(a2, 171),
        Transfer::new(a1)
            .input(NoteRef::output(0, 1))
            .input(NoteRef::output(0, 3))
            .output(a0, 50)
            .output(a2, 50)
            .public_value(89),
    ])
}

/// Mint (optionally) and approve the deposit for account 0
pub fn demo_prerequisites(
    accounts: &[AccountId; 3],
    bridge: &AccountId,
    scaling_factor: u128,
    mint: bool,
) -> Vec<PublicBalanceOp> {
    let amount = u128::from(DEMO_DEPOSIT) * scaling_factor;
    let mut ops = Vec::with_capacity(2);
    if mint {
        ops.push(PublicBalanceOp::Mint {
            to: accounts[0],
            amount,
        });
    }
    ops.push(PublicBalanceOp::Approve {
        owner: accounts[0],
        spender: *bridge,
        amount,
    });
    ops
}
