//! Broker topology, declared idempotently at startup.
//!
//! Topic exchange `jobs.exchange` with one durable queue per priority
//! family and shard (`jobs.{family}.{shard}` bound to
//! `jobs.priority.{family}.{shard}`), the status queue bound to
//! `jobs.status.*`, the control queue, and the dead-letter queue with a
//! five minute TTL. Main queues dead-letter into `jobs.dlq` after three
//! delivery attempts.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::info;

use applygate_core::types::Priority;

use crate::error::DispatchError;

pub const STATUS_QUEUE: &str = "jobs.status";
pub const CONTROL_QUEUE: &str = "jobs.control";
pub const DLQ: &str = "jobs.dlq";
pub const CONTROL_ROUTING_KEY: &str = "jobs.control";

const DLQ_TTL_MS: i64 = 5 * 60 * 1_000;
const MAX_DELIVERIES: i64 = 3;

fn durable() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    }
}

pub async fn declare_topology(
    channel: &Channel,
    exchange: &str,
    shards_per_priority: u32,
) -> Result<(), DispatchError> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    // Dead-letter queue first so the work queues can point at it.
    let mut dlq_args = FieldTable::default();
    dlq_args.insert("x-message-ttl".into(), AMQPValue::LongLongInt(DLQ_TTL_MS));
    channel.queue_declare(DLQ, durable(), dlq_args).await?;

    let mut work_args = FieldTable::default();
    work_args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
    work_args.insert("x-dead-letter-routing-key".into(), AMQPValue::LongString(DLQ.into()));
    work_args.insert("x-delivery-limit".into(), AMQPValue::LongLongInt(MAX_DELIVERIES));

    for priority in Priority::ALL {
        for shard in 0..shards_per_priority {
            let queue = format!("jobs.{}.{shard}", priority.queue_suffix());
            let key = format!("jobs.priority.{}.{shard}", priority.queue_suffix());
            channel
                .queue_declare(&queue, durable(), work_args.clone())
                .await?;
            channel
                .queue_bind(&queue, exchange, &key, QueueBindOptions::default(), FieldTable::default())
                .await?;
        }
    }

    channel
        .queue_declare(STATUS_QUEUE, durable(), work_args.clone())
        .await?;
    channel
        .queue_bind(
            STATUS_QUEUE,
            exchange,
            "jobs.status.*",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(CONTROL_QUEUE, durable(), FieldTable::default())
        .await?;
    channel
        .queue_bind(
            CONTROL_QUEUE,
            exchange,
            CONTROL_ROUTING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(exchange, shards_per_priority, "broker topology declared");
    Ok(())
}
