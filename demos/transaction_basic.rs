use kvtxn::{
    KvClient,
    compare::{Compare, CompareOp},
    memory::{MemoryConnector, MemoryStore},
    op::Op,
    proto::ResponseOp,
};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    // An in-process store, and a client connected to it
    let store = MemoryStore::new();
    let connector = MemoryConnector::new(store.clone());
    let channel = connector.connect();
    let kv = KvClient::new(connector.clone(), channel.clone());

    kv.put("k1", "v1")?;

    // If k1 still holds v1, write k2, otherwise write k4
    let tx = kv.txn();
    tx.when([Compare::value("k1", CompareOp::Equal, "v1")])
        .and_then([Op::put("k2", "v2")])
        .or_else([Op::put("k4", "v4")]);
    let response = tx.commit()?;
    println!(
        "succeeded: {}, responses: {:?}",
        response.succeeded,
        response
            .responses
            .iter()
            .map(ResponseOp::type_name)
            .collect::<Vec<_>>()
    );

    // Break the connection: the next commit reconnects and goes through
    channel.close();
    let tx = kv.txn();
    tx.when([Compare::version("k2", CompareOp::Equal, 1)])
        .and_then([Op::delete("k1")]);
    let response = tx.commit()?;
    println!(
        "succeeded after {} reconnect(s): {}",
        connector.reconnects(),
        response.succeeded
    );

    for key in ["k1", "k2", "k4"] {
        match store.get(key.as_bytes()) {
            Some(kv) => println!("{key} = {}", String::from_utf8_lossy(&kv.value)),
            None => println!("{key} is not set"),
        }
    }

    #[cfg(feature = "json")]
    println!("\nas JSON: {}", response.to_json()?);

    Ok(())
}
