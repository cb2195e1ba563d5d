//! Output of processing one command.
//!
//! Processing a command yields the records to append (follow-up events,
//! commands or a rejection) and the side effects to run once those records
//! are committed. Side effects never run before the commit, so a leader that
//! loses its term before committing never answers a client or forwards a
//! command based on state that might be discarded.

use crate::record::{
    AppendEntry, Intent, PartitionId, RecordMetadata, RecordType, RecordValue, Rejection,
};

/// A command sent from one partition to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterPartitionCommand {
    pub sender_partition: PartitionId,
    pub receiver_partition: PartitionId,
    pub key: i64,
    pub intent: Intent,
    pub value: RecordValue,
}

impl InterPartitionCommand {
    /// The command as it is appended on the receiving partition.
    pub fn to_append_entry(&self, timestamp: i64) -> AppendEntry {
        AppendEntry::command(self.intent, self.value.clone())
            .with_key(self.key)
            .with_producer(self.sender_partition)
            .with_timestamp(timestamp)
    }
}

/// Answer to a client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub request_id: i64,
    pub request_stream_id: i32,
    pub key: i64,
    pub record_type: RecordType,
    pub intent: Intent,
    pub value: RecordValue,
    pub rejection: Option<Rejection>,
}

impl CommandResponse {
    pub fn is_rejection(&self) -> bool {
        self.record_type == RecordType::CommandRejection
    }
}

/// A side effect executed after the produced records are committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCommitTask {
    Respond(CommandResponse),
    SendCommand(InterPartitionCommand),
}

/// Records and side effects produced by one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    pub records: Vec<AppendEntry>,
    pub tasks: Vec<PostCommitTask>,
}

impl ProcessingResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.tasks.is_empty()
    }
}

/// Collects the output of a command while it is processed.
#[derive(Debug)]
pub struct ProcessingResultBuilder {
    source_position: i64,
    timestamp: i64,
    producer_id: i32,
    request_id: i64,
    request_stream_id: i32,
    result: ProcessingResult,
}

impl ProcessingResultBuilder {
    /// Builder for the follow-ups of `command`.
    pub fn for_command(
        source_position: i64,
        timestamp: i64,
        producer_id: i32,
        command_metadata: &RecordMetadata,
    ) -> Self {
        Self {
            source_position,
            timestamp,
            producer_id,
            request_id: command_metadata.request_id,
            request_stream_id: command_metadata.request_stream_id,
            result: ProcessingResult::default(),
        }
    }

    fn stamp(&self, entry: AppendEntry) -> AppendEntry {
        entry
            .with_source(self.source_position)
            .with_timestamp(self.timestamp)
            .with_producer(self.producer_id)
    }

    pub fn append_event(&mut self, key: i64, intent: Intent, value: RecordValue) {
        let entry = self.stamp(AppendEntry::event(key, intent, value));
        self.result.records.push(entry);
    }

    pub fn append_rejection(
        &mut self,
        key: i64,
        intent: Intent,
        value: RecordValue,
        rejection: Rejection,
    ) {
        let mut entry = self.stamp(AppendEntry::command(intent, value).with_key(key));
        entry.metadata = RecordMetadata::rejection(intent, rejection)
            .with_request(self.request_id, self.request_stream_id);
        self.result.records.push(entry);
    }

    /// Answer the requesting client, if the command came from one.
    pub fn respond(
        &mut self,
        key: i64,
        record_type: RecordType,
        intent: Intent,
        value: RecordValue,
        rejection: Option<Rejection>,
    ) {
        if self.request_id < 0 {
            return;
        }
        self.result.tasks.push(PostCommitTask::Respond(CommandResponse {
            request_id: self.request_id,
            request_stream_id: self.request_stream_id,
            key,
            record_type,
            intent,
            value,
            rejection,
        }));
    }

    pub fn send_command(&mut self, command: InterPartitionCommand) {
        self.result.tasks.push(PostCommitTask::SendCommand(command));
    }

    pub fn build(self) -> ProcessingResult {
        self.result
    }
}
