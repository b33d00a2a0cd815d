use std::collections::HashMap;
use std::path::Path;

use crate::error::{read_required, AsrError};

pub const BLANK_ID: usize = 0;
pub const UNK_ID: usize = 1;
pub const SOS_ID: usize = 2;
pub const EOS_ID: usize = 2;
pub const PAD_ID: usize = 3;

pub const UNK_TOKEN: &str = "<unk>";
pub const SPACE_TOKEN: &str = "<space>";

/// Immutable token <-> id table loaded from a dictionary file.
///
/// Each line holds `token id` or just `token`; a bare token gets the id
/// `line_number + 1`, leaving 0 for the CTC blank.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    token_to_id: HashMap<String, usize>,
    id_to_token: HashMap<usize, String>,
}

impl Vocabulary {
    pub fn load(path: &Path) -> Result<Self, AsrError> {
        let data = read_required("read dictionary", path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self, AsrError> {
        let mut token_to_id = HashMap::new();
        let mut id_to_token = HashMap::new();
        for (line_no, line) in data.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let mut fields = line.split_whitespace();
            let Some(token) = fields.next() else {
                continue;
            };
            let id = match fields.next() {
                Some(raw) => raw.parse::<usize>().map_err(|_| {
                    AsrError::invalid_input(format!(
                        "dictionary line {}: id '{raw}' is not an integer",
                        line_no + 1
                    ))
                })?,
                None => line_no + 1,
            };
            if id == BLANK_ID {
                return Err(AsrError::invalid_input(format!(
                    "dictionary line {}: id 0 is reserved for blank",
                    line_no + 1
                )));
            }
            token_to_id.insert(token.to_string(), id);
            id_to_token.insert(id, token.to_string());
        }
        Ok(Self {
            token_to_id,
            id_to_token,
        })
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.token_to_id.get(token).copied()
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token_to_id.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    /// Output dimension of a model over this vocabulary: entries plus the blank.
    pub fn size(&self) -> usize {
        self.len() + 1
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.token_to_id.keys().map(String::as_str)
    }
}

/// Vocabulary size of a dictionary file without building the maps.
pub fn count_vocab_size(path: &Path) -> Result<usize, AsrError> {
    let data = read_required("read dictionary", path)?;
    Ok(data.lines().filter(|l| !l.trim().is_empty()).count() + 1)
}

/// Whether an id is dropped when rendering a hypothesis as text.
pub(crate) fn is_silent(id: usize) -> bool {
    id == BLANK_ID || id == EOS_ID || id == PAD_ID
}
