//! Dashboard topics and the snapshot each one pushes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use linesync_core::{
    CacheInvalidation, Result, SharedCache, SnapshotQuery, Topic, TopicRegistry,
};

use crate::line::{
    LineStore, CALL_TABLE, DOWNTIME_TABLE, GLOBAL_TABLE, PROCESS_TABLE, SEQUENCE_TABLE,
};

pub const SEQUENCES: &str = "sequences";
pub const SUMMARY: &str = "summary";
pub const CALLS: &str = "calls";
pub const PROCESSES: &str = "processes";
pub const DOWNTIME: &str = "downtime";

/// Cache resource holding REST reads of the sequence board.
pub const SEQUENCES_RESOURCE: &str = "sequences";

/// Which read a topic's snapshot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Board {
    Sequences,
    Summary,
    Calls,
    Processes,
    Downtime,
}

/// Snapshot of one dashboard board.
struct BoardQuery {
    line: LineStore,
    board: Board,
}

#[async_trait]
impl SnapshotQuery for BoardQuery {
    async fn snapshot(&self) -> Result<Value> {
        let value = match self.board {
            Board::Sequences => serde_json::to_value(self.line.sequence_board()?)?,
            Board::Summary => serde_json::to_value(self.line.summary()?)?,
            Board::Calls => serde_json::to_value(self.line.active_calls()?)?,
            Board::Processes => serde_json::to_value(self.line.active_processes()?)?,
            Board::Downtime => serde_json::to_value(self.line.downtime()?)?,
        };
        Ok(value)
    }
}

fn topic(name: &str, table: &str, line: &LineStore, board: Board) -> Topic {
    Topic::new(
        name,
        table,
        format!("{}:update", name),
        Arc::new(BoardQuery {
            line: line.clone(),
            board,
        }),
    )
}

/// Register every dashboard topic.
///
/// Changes to the sequence table also drop cached REST reads of it.
pub fn register_topics(
    registry: &mut TopicRegistry,
    line: &LineStore,
    cache: SharedCache,
) -> Result<()> {
    registry.register(
        topic(SEQUENCES, SEQUENCE_TABLE, line, Board::Sequences)
            .with_hook(Arc::new(CacheInvalidation::new(cache).resource(SEQUENCES_RESOURCE))),
    )?;
    registry.register(topic(SUMMARY, GLOBAL_TABLE, line, Board::Summary))?;
    registry.register(topic(CALLS, CALL_TABLE, line, Board::Calls))?;
    registry.register(topic(PROCESSES, PROCESS_TABLE, line, Board::Processes))?;
    registry.register(topic(DOWNTIME, DOWNTIME_TABLE, line, Board::Downtime))?;
    Ok(())
}
