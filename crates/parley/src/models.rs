//! These models represent the objects passed between the consumer, the relay and the providers
//!
//! There are several different related formats we need to interact with:
//! - chat messages with tool invocations, sent from the consumer to the relay
//! - newline delimited stream frames, sent from the relay back to the consumer
//! - openai and anthropic messages/tools, sent from the relay to the LLM
//! - mcp tool definitions, discovered from a remote tool server
//!
//! We always immediately convert those formats into the internal structs using to/from helpers.
pub mod conversation;
pub mod message;
pub mod tool;
