//! Request and response types shared by the integration tests, modelled on
//! the mock server's API.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use restwire_core::{
    Decoded, DownloadRequest, Endpoint, ListRequest, PageCursor, PayloadRequest, RestRequest, RestResponse,
    TextRequest,
};
use serde::{Deserialize, Serialize};

pub const WAIT: Duration = Duration::from_secs(10);

/// Completion that forwards into a channel, plus the receiving end.
pub fn channel<T: Send + 'static>() -> (impl FnOnce(Decoded<T>) + Send + 'static, mpsc::Receiver<Decoded<T>>) {
    let (tx, rx) = mpsc::channel();
    (
        move |decoded| {
            let _ = tx.send(decoded);
        },
        rx,
    )
}

// --- user ---

pub struct UserRequest;

impl Endpoint for UserRequest {
    fn endpoint(&self) -> String {
        "example/user/".to_string()
    }
}

impl RestRequest for UserRequest {
    type Response = User;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

impl RestResponse<UserRequest> for User {
    type Wire = User;

    fn from_wire(wire: User, _request: &UserRequest) -> Option<Self> {
        Some(wire)
    }
}

// --- notes ---

#[derive(Debug, Clone, Serialize)]
pub struct NoteInput {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Note {
    pub id: u64,
    pub title: String,
    pub body: String,
}

/// Create (POST), replace (PUT) or modify (PATCH) a note, depending on the verb used.
pub struct NoteRequest {
    pub id: Option<u64>,
    pub input: NoteInput,
}

impl NoteRequest {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            input: NoteInput {
                title: title.to_string(),
                body: None,
            },
        }
    }

    pub fn for_note(id: u64, title: &str, body: Option<&str>) -> Self {
        Self {
            id: Some(id),
            input: NoteInput {
                title: title.to_string(),
                body: body.map(str::to_string),
            },
        }
    }
}

impl Endpoint for NoteRequest {
    fn endpoint(&self) -> String {
        match self.id {
            Some(id) => format!("notes/{id}/"),
            None => "notes/".to_string(),
        }
    }
}

impl RestRequest for NoteRequest {
    type Response = Note;
}

impl PayloadRequest for NoteRequest {
    type Payload = NoteInput;

    fn payload(&self) -> &NoteInput {
        &self.input
    }
}

impl RestResponse<NoteRequest> for Note {
    type Wire = Note;

    fn from_wire(wire: Note, _request: &NoteRequest) -> Option<Self> {
        Some(wire)
    }
}

pub struct DeleteNote(pub u64);

impl Endpoint for DeleteNote {
    fn endpoint(&self) -> String {
        format!("notes/{}/", self.0)
    }
}

impl RestRequest for DeleteNote {
    type Response = restwire_core::Discard;
}

// --- items ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
}

#[derive(Default)]
pub struct ItemList {
    pub descending: bool,
}

impl Endpoint for ItemList {
    fn endpoint(&self) -> String {
        "items/".to_string()
    }
}

impl ListRequest for ItemList {
    type Item = Item;

    fn first_page(&self) -> PageCursor {
        PageCursor::default().sorted_by("id", !self.descending)
    }
}

impl RestResponse<ItemList> for Item {
    type Wire = Item;

    fn from_wire(wire: Item, _request: &ItemList) -> Option<Self> {
        Some(wire)
    }
}

// --- text ---

pub struct Motd;

impl Endpoint for Motd {
    fn endpoint(&self) -> String {
        "motd/".to_string()
    }
}

impl TextRequest for Motd {
    type Response = String;
}

pub struct Echo(pub Vec<(String, String)>);

impl Endpoint for Echo {
    fn endpoint(&self) -> String {
        "echo/".to_string()
    }
}

impl TextRequest for Echo {
    type Response = String;

    fn form_fields(&self) -> Vec<(String, String)> {
        self.0.clone()
    }
}

// --- files ---

pub struct Report;

impl Endpoint for Report {
    fn endpoint(&self) -> String {
        "files/report.txt".to_string()
    }
}

impl DownloadRequest for Report {
    type Response = PathBuf;
}
