//! Print a summary of a `consensus.blockchain` or `genesis.block` snapshot.

use chainlib::consensus::check_candidate;
use chainlib::types::{Block, Blockchain};
use chainlib::util::Saveable;
use std::{env, process::exit};

fn main() {
    // snapshot path first, then any number of addresses to report balances for
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("Usage: inspect_snapshot <snapshot_file> [address...]");
        exit(1);
    };
    let addresses: Vec<String> = args.collect();

    // a consensus snapshot is a list of blocks, a genesis snapshot a single one
    let chain = match Blockchain::load_from_file(&path) {
        Ok(chain) => chain,
        Err(_) => match Block::load_from_file(&path) {
            Ok(genesis) => Blockchain::from_blocks(vec![genesis]),
            Err(e) => {
                eprintln!("{path} is neither a chain nor a block snapshot: {e}");
                exit(1);
            }
        },
    };

    println!("blocks: {}", chain.len());
    if let Some(tip) = chain.tip() {
        println!("tip: {} (nonce {})", tip.hash, tip.nonce);
    }
    match check_candidate(&chain) {
        Ok(()) => println!("valid: yes"),
        Err(e) => println!("valid: no ({e})"),
    }
    for address in &addresses {
        println!("balance of {address}: {}", chain.balance_of(address));
    }
}
