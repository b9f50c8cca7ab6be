//! CodiPOP Relay
//!
//! Backend relay for the CodiPOP virtual fitting app. The service owns no
//! state of its own: every request fans out to managed services and the
//! result goes straight back to the client.
//!
//! ## Features
//!
//! - **Virtual Try-On**: A person photo and one or more clothing photos go to
//!   Gemini in a single call; the generated image is written to Cloud Storage
//!   as a public object and its URL is returned
//! - **Outfit Recommendation**: The user's most recent closet items are read
//!   from Firestore and turned into a styling prompt for a text model
//!
//! ## Architecture
//!
//! ```text
//!   Client (multipart / JSON)
//!            │
//!            ▼
//! ┌──────────────────────┐         ┌──────────────┐
//! │ Relay API            │────────▶│ Gemini       │
//! │  POST /try-on        │         │ generateCont │
//! │  POST /get-recommend │         └──────────────┘
//! └──────────────────────┘
//!        │          │
//!        ▼          ▼
//! ┌──────────────┐ ┌──────────────┐
//! │ Cloud        │ │ Firestore    │
//! │ Storage      │ │ users/{id}/  │
//! │ results/     │ │   closet     │
//! └──────────────┘ └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod generation;
pub mod prompts;
pub mod storage;
pub mod upload;
pub mod wardrobe;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::ApiError;
pub use generation::{GeminiClient, GeneratedImage, GenerationError, GenerativeModel, ImagePart};
pub use storage::{ArtifactStore, GcsArtifactStore, ObjectNamer, StoredArtifact};
pub use upload::{FieldNames, TryOnUpload, UploadedFile};
pub use wardrobe::{FirestoreWardrobe, WardrobeItem, WardrobeStore};
