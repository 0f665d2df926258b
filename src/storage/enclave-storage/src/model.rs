//! Record model.
//!
//! A [`SecretRecord`] is what gets persisted: plaintext metadata (title,
//! username, card brand, ...) next to [`EncryptedField`]s for the sensitive
//! attributes. A [`SecretDraft`] is the plaintext form of the same record,
//! used when creating a record and when revealing one.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use enclave_crypto::EncryptedField;

/// A folder grouping secret records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl Folder {
    /// Creates a folder with a fresh identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }
}

/// A persisted secret record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Unique identifier.
    pub id: String,
    /// Display title (plaintext).
    pub title: String,
    /// Folder the record is filed under, if any.
    pub folder_id: Option<String>,
    /// Kind-specific attributes.
    pub kind: SecretKind,
}

/// The closed set of secret kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecretKind {
    /// A login credential.
    Credential {
        /// Account user name.
        username: String,
        /// Encrypted password.
        password: EncryptedField,
        /// Contact e-mail.
        email: Option<String>,
        /// Site address.
        url: Option<String>,
    },
    /// A free-form note.
    Note {
        /// Encrypted note body.
        note: EncryptedField,
    },
    /// A payment card.
    Card {
        /// Card holder name.
        owner_name: String,
        /// Encrypted card number.
        card_number: EncryptedField,
        /// Encrypted PIN, if recorded.
        pin: Option<EncryptedField>,
        /// Card brand.
        brand: String,
        /// Expiration date as printed on the card (MM/YY).
        expiration_date: String,
        /// Encrypted security code.
        cvv: EncryptedField,
    },
}

impl SecretKind {
    /// Returns the kind tag stored alongside the record.
    pub fn tag(&self) -> &'static str {
        match self {
            SecretKind::Credential { .. } => "Credential",
            SecretKind::Note { .. } => "Note",
            SecretKind::Card { .. } => "Card",
        }
    }
}

impl SecretRecord {
    /// Lists the record's encrypted fields by name.
    pub fn encrypted_fields(&self) -> Vec<(&'static str, &EncryptedField)> {
        match &self.kind {
            SecretKind::Credential { password, .. } => vec![("password", password)],
            SecretKind::Note { note } => vec![("note", note)],
            SecretKind::Card {
                card_number,
                pin,
                cvv,
                ..
            } => {
                let mut fields = vec![("card_number", card_number), ("cvv", cvv)];
                if let Some(pin) = pin {
                    fields.push(("pin", pin));
                }
                fields
            },
        }
    }

    /// Rebuilds the record with every encrypted field passed through `f`.
    ///
    /// Stops at the first error; the original record is consumed either way.
    pub fn try_map_encrypted_fields<E>(
        self,
        mut f: impl FnMut(&'static str, EncryptedField) -> Result<EncryptedField, E>,
    ) -> Result<Self, E> {
        let kind = match self.kind {
            SecretKind::Credential {
                username,
                password,
                email,
                url,
            } => SecretKind::Credential {
                username,
                password: f("password", password)?,
                email,
                url,
            },
            SecretKind::Note { note } => SecretKind::Note {
                note: f("note", note)?,
            },
            SecretKind::Card {
                owner_name,
                card_number,
                pin,
                brand,
                expiration_date,
                cvv,
            } => SecretKind::Card {
                owner_name,
                card_number: f("card_number", card_number)?,
                pin: pin.map(|pin| f("pin", pin)).transpose()?,
                brand,
                expiration_date,
                cvv: f("cvv", cvv)?,
            },
        };

        Ok(Self { kind, ..self })
    }

    /// Decrypts the record into its plaintext form.
    pub fn reveal<E>(
        &self,
        mut decrypt: impl FnMut(&EncryptedField) -> Result<Zeroizing<String>, E>,
    ) -> Result<SecretDraft, E> {
        let kind = match &self.kind {
            SecretKind::Credential {
                username,
                password,
                email,
                url,
            } => DraftKind::Credential {
                username: username.clone(),
                password: decrypt(password)?,
                email: email.clone(),
                url: url.clone(),
            },
            SecretKind::Note { note } => DraftKind::Note {
                note: decrypt(note)?,
            },
            SecretKind::Card {
                owner_name,
                card_number,
                pin,
                brand,
                expiration_date,
                cvv,
            } => DraftKind::Card {
                owner_name: owner_name.clone(),
                card_number: decrypt(card_number)?,
                pin: pin.as_ref().map(&mut decrypt).transpose()?,
                brand: brand.clone(),
                expiration_date: expiration_date.clone(),
                cvv: decrypt(cvv)?,
            },
        };

        Ok(SecretDraft {
            title: self.title.clone(),
            folder_id: self.folder_id.clone(),
            kind,
        })
    }
}

/// The plaintext form of a secret record.
///
/// Sensitive attributes are held in `Zeroizing` buffers.
pub struct SecretDraft {
    /// Display title.
    pub title: String,
    /// Folder to file the record under.
    pub folder_id: Option<String>,
    /// Kind-specific attributes.
    pub kind: DraftKind,
}

/// Plaintext attributes of each secret kind.
pub enum DraftKind {
    /// A login credential.
    Credential {
        /// Account user name.
        username: String,
        /// Password.
        password: Zeroizing<String>,
        /// Contact e-mail.
        email: Option<String>,
        /// Site address.
        url: Option<String>,
    },
    /// A free-form note.
    Note {
        /// Note body.
        note: Zeroizing<String>,
    },
    /// A payment card.
    Card {
        /// Card holder name.
        owner_name: String,
        /// Card number.
        card_number: Zeroizing<String>,
        /// PIN, if recorded.
        pin: Option<Zeroizing<String>>,
        /// Card brand.
        brand: String,
        /// Expiration date (MM/YY).
        expiration_date: String,
        /// Security code.
        cvv: Zeroizing<String>,
    },
}

impl SecretDraft {
    /// Encrypts the draft into a new record with a fresh identifier.
    pub fn seal<E>(
        self,
        encrypt: impl FnMut(&str) -> Result<EncryptedField, E>,
    ) -> Result<SecretRecord, E> {
        self.seal_with_id(Uuid::new_v4().to_string(), encrypt)
    }

    /// Encrypts the draft into a record with the given identifier.
    pub fn seal_with_id<E>(
        self,
        id: String,
        mut encrypt: impl FnMut(&str) -> Result<EncryptedField, E>,
    ) -> Result<SecretRecord, E> {
        let kind = match self.kind {
            DraftKind::Credential {
                username,
                password,
                email,
                url,
            } => SecretKind::Credential {
                username,
                password: encrypt(&password)?,
                email,
                url,
            },
            DraftKind::Note { note } => SecretKind::Note {
                note: encrypt(&note)?,
            },
            DraftKind::Card {
                owner_name,
                card_number,
                pin,
                brand,
                expiration_date,
                cvv,
            } => SecretKind::Card {
                owner_name,
                card_number: encrypt(&card_number)?,
                pin: pin.as_deref().map(|pin| encrypt(pin)).transpose()?,
                brand,
                expiration_date,
                cvv: encrypt(&cvv)?,
            },
        };

        Ok(SecretRecord {
            id,
            title: self.title,
            folder_id: self.folder_id,
            kind,
        })
    }
}
