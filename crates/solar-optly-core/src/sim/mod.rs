//! In-memory browser for exercising both sides of the protocol together.

mod browser;
mod dom;
mod fixture;
mod frame;
mod page;
mod scenario;
mod selector;

pub use browser::{Browser, IframeSnapshot, PageSnapshot, RowSnapshot, TimelineEntry, TimelineEvent};
pub use dom::{Document, Element, StyleValue};
pub use fixture::{widget, PageFixture, RenderedPage, ROW_CLASSES};
pub use frame::{AppProfile, EmbeddedDocument, EmbeddedFrame, RecordingSink};
pub use page::{
    Capabilities, FakePage, FakeSessionStorage, Mutation, PostedMessage, PushBinding, StorageMode,
};
pub use scenario::{Scenario, ScenarioAction, ScenarioError, ScenarioReport, ScenarioStep};
