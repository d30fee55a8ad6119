//! The interactive demo console.
//!
//! Reads one command per line from stdin and drives the node:
//!
//! ```text
//! store <key> <value> <ttl_secs>   publish a value
//! findvalue <key>                  look a key up
//! findnodes <key>                  find the k closest nodes
//! getcontact <hex id>              fetch a contact's details
//! store50 <prefix>                 publish 50 values under prefix keys
//! timings                          print per-verb RPC latencies
//! help                             print usage
//! exit                             leave the network and quit
//! ```
//!
//! A `<key>` argument is either a full 128-character hex id or an
//! arbitrary word, which is hashed into the key space.

use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};

use korium_kad::node::Node;
use korium_types::{Contact, NodeId};

/// Default TTL for demo stores.
const DEMO_TTL: Duration = Duration::from_secs(3600);

/// The demo command processor.
pub struct Commands {
    node: Node,
}

impl Commands {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    /// Read and process commands until `exit` or end of input.
    pub async fn run(&self) -> anyhow::Result<()> {
        println!("Korium node {} ready; type `help` for commands.", self.node.node_id());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !self.process_command(line).await {
                break;
            }
        }
        Ok(())
    }

    /// Handle one command line; returns false on `exit`.
    async fn process_command(&self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match command {
            "store" => self.store(&args).await,
            "findvalue" => self.find_value(&args).await,
            "findnodes" => self.find_nodes(&args).await,
            "getcontact" => self.get_contact(&args).await,
            "store50" => self.store50(&args).await,
            "timings" => self.print_timings(),
            "help" => print_usage(),
            "exit" => return false,
            other => println!("unknown command `{other}`; type `help`"),
        }
        true
    }

    async fn store(&self, args: &[&str]) {
        let &[key, value, ttl] = args else {
            println!("usage: store <key> <value> <ttl_secs>");
            return;
        };
        let key = parse_key(key);
        let Ok(ttl_secs) = ttl.parse::<u64>() else {
            println!("bad ttl `{ttl}`");
            return;
        };
        let started = Instant::now();
        match self
            .node
            .store(key, value.as_bytes().to_vec(), Duration::from_secs(ttl_secs))
            .await
        {
            Ok(()) => println!(
                "stored under {} in {:?}",
                &key.to_hex()[..16],
                started.elapsed()
            ),
            Err(e) => println!("store failed: {e}"),
        }
    }

    async fn find_value(&self, args: &[&str]) {
        let &[key] = args else {
            println!("usage: findvalue <key>");
            return;
        };
        let key = parse_key(key);
        let started = Instant::now();
        match self.node.find_value(key).await {
            Ok(result) if result.found() => {
                println!("found {} value(s) in {:?}:", result.values.len(), started.elapsed());
                for value in &result.values {
                    println!("  {}", String::from_utf8_lossy(value));
                }
            }
            Ok(result) => {
                println!(
                    "no value; {} closest node(s) in {:?}:",
                    result.closest_nodes.len(),
                    started.elapsed()
                );
                for contact in &result.closest_nodes {
                    print_contact(contact);
                }
            }
            Err(e) => println!("findvalue failed: {e}"),
        }
    }

    async fn find_nodes(&self, args: &[&str]) {
        let &[key] = args else {
            println!("usage: findnodes <key>");
            return;
        };
        let key = parse_key(key);
        match self.node.find_nodes(key).await {
            Ok(contacts) => {
                println!("{} node(s):", contacts.len());
                for contact in &contacts {
                    print_contact(contact);
                }
            }
            Err(e) => println!("findnodes failed: {e}"),
        }
    }

    async fn get_contact(&self, args: &[&str]) {
        let &[id] = args else {
            println!("usage: getcontact <hex id>");
            return;
        };
        let Ok(id) = NodeId::from_hex(id) else {
            println!("bad id; expected {} hex chars", 2 * korium_types::KEY_SIZE_BYTES);
            return;
        };
        match self.node.get_contact(id).await {
            Ok(Some(contact)) => print_contact(&contact),
            Ok(None) => println!("contact not found"),
            Err(e) => println!("getcontact failed: {e}"),
        }
    }

    async fn store50(&self, args: &[&str]) {
        let &[prefix] = args else {
            println!("usage: store50 <prefix>");
            return;
        };
        let mut stored = 0usize;
        let started = Instant::now();
        for i in 0..50u8 {
            let key = parse_key(&format!("{prefix}{i}"));
            let value = format!("{prefix}_value_{i}");
            match self.node.store(key, value.into_bytes(), DEMO_TTL).await {
                Ok(()) => stored += 1,
                Err(e) => println!("store {i} failed: {e}"),
            }
        }
        println!("stored {stored}/50 values in {:?}", started.elapsed());
    }

    fn print_timings(&self) {
        let snapshot = self.node.rpcs().timings().snapshot();
        if snapshot.is_empty() {
            println!("no RPCs issued yet");
            return;
        }
        println!("{:<16} {:>8} {:>10} {:>10} {:>10}", "verb", "count", "mean", "min", "max");
        for (verb, stats) in snapshot {
            let mean = stats.total / u32::try_from(stats.count.max(1)).unwrap_or(1);
            println!(
                "{verb:<16} {:>8} {:>10} {:>10} {:>10}",
                stats.count,
                format!("{mean:?}"),
                format!("{:?}", stats.min),
                format!("{:?}", stats.max),
            );
        }
    }
}

/// Parse a key argument: a full hex id, or any word hashed into the key
/// space.
fn parse_key(arg: &str) -> NodeId {
    NodeId::from_hex(arg)
        .unwrap_or_else(|_| NodeId::from_bytes(korium_crypto::blake3::hash_to_key(arg.as_bytes())))
}

fn print_contact(contact: &Contact) {
    println!(
        "  {}  {}  {}",
        &contact.node_id.to_hex()[..16],
        contact.endpoint,
        if contact.directly_connected {
            "direct"
        } else {
            "rendezvous"
        }
    );
}

fn print_usage() {
    println!("commands:");
    println!("  store <key> <value> <ttl_secs>   publish a value");
    println!("  findvalue <key>                  look a key up");
    println!("  findnodes <key>                  find the k closest nodes");
    println!("  getcontact <hex id>              fetch a contact's details");
    println!("  store50 <prefix>                 publish 50 values");
    println!("  timings                          print per-verb RPC latencies");
    println!("  help                             this text");
    println!("  exit                             leave and quit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_hex_and_word() {
        let id = NodeId::from_bytes([7u8; 64]);
        assert_eq!(parse_key(&id.to_hex()), id);

        // A non-hex word is hashed deterministically.
        let hashed = parse_key("hello");
        assert_eq!(hashed, parse_key("hello"));
        assert_ne!(hashed, parse_key("world"));
        assert_eq!(
            hashed,
            NodeId::from_bytes(korium_crypto::blake3::hash_to_key(b"hello"))
        );
    }
}
