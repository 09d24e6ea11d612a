use serde::{Deserialize, Serialize};

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Read, Result, Write},
    path::Path,
};

use crate::sha256::Hash;
use crate::types::Transaction;

/// Digest committing a block to its transactions: SHA-256 over the concatenated serializations,
/// no tree and no length prefixes.
#[derive(Debug, Clone, Deserialize, Serialize, Copy, Eq, PartialEq)]
pub struct TransactionsDigest(Hash);

impl TransactionsDigest {
    pub fn calculate(transactions: &[Transaction]) -> Self {
        let mut concatenated: Vec<u8> = vec![];
        for transaction in transactions {
            concatenated.extend_from_slice(&transaction.serialise());
        }
        TransactionsDigest(Hash::digest(&concatenated))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

pub trait Saveable
where
    Self: Sized,
{
    fn load<I: Read>(reader: I) -> Result<Self>;
    fn save<O: Write>(&self, writer: O) -> Result<()>;

    /// Writes next to the destination and renames over it, so readers polling the file never see
    /// a partial snapshot.
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        {
            let mut writer = BufWriter::new(File::create(&staging)?);
            self.save(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&staging, path)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        Self::load(BufReader::new(file))
    }
}

/// Read the `host:port` peer list, one address per line. Blank lines are skipped.
pub fn read_peers<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let mut peers = vec![];
    for line in BufReader::new(file).lines() {
        let line = line?;
        let peer = line.trim();
        if !peer.is_empty() {
            peers.push(peer.to_owned());
        }
    }
    Ok(peers)
}

/// Append an address to the peer list unless it is already listed. Returns whether it was added.
pub fn register_peer<P: AsRef<Path>>(path: P, address: &str) -> Result<bool> {
    let path = path.as_ref();
    match read_peers(path) {
        Ok(peers) if peers.iter().any(|peer| peer == address) => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{address}")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_depends_on_order() {
        let a = Transaction::new("A1", "A2", 1);
        let b = Transaction::new("A2", "A1", 1);
        let forward = TransactionsDigest::calculate(&[a.clone(), b.clone()]);
        let backward = TransactionsDigest::calculate(&[b, a]);
        assert_ne!(forward, backward);
    }

    #[test]
    fn empty_digest_is_hash_of_nothing() {
        assert_eq!(
            TransactionsDigest::calculate(&[]).as_bytes(),
            Hash::digest(b"").as_bytes()
        );
    }

    #[test]
    fn peers_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.txt");
        assert!(read_peers(&path).is_err());

        assert!(register_peer(&path, "127.0.0.1:3000").unwrap());
        assert!(register_peer(&path, "127.0.0.1:3001").unwrap());
        assert!(!register_peer(&path, "127.0.0.1:3000").unwrap());

        fs::write(
            &path,
            fs::read_to_string(&path).unwrap() + "\n  \n127.0.0.1:3002\n",
        )
        .unwrap();
        assert_eq!(
            read_peers(&path).unwrap(),
            vec!["127.0.0.1:3000", "127.0.0.1:3001", "127.0.0.1:3002"]
        );
    }
}
