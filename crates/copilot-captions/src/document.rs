//! Captions and keywords of one narrated document, loaded from its directory.

use crate::captions::CaptionTrack;
use crate::error::CaptionResult;
use crate::keywords::KeywordIndex;
use crate::script::parse_script;
use copilot_core::CaptionConfig;
use std::path::Path;
use tracing::{info, warn};

pub const SCRIPT_FILE: &str = "audio_scripts.txt";
pub const KEYWORDS_FILE: &str = "keywords.txt";

#[derive(Debug, Clone, Default)]
pub struct DocumentCaptions {
    pub captions: CaptionTrack,
    pub keywords: KeywordIndex,
}

impl DocumentCaptions {
    /// Read `audio_scripts.txt` and, when present, `keywords.txt` from `dir`. Without
    /// `keywords.txt` the keywords come from the script's own markers.
    pub fn load_from_dir(dir: impl AsRef<Path>, config: &CaptionConfig) -> CaptionResult<Self> {
        let dir = dir.as_ref();
        let script = std::fs::read_to_string(dir.join(SCRIPT_FILE))?;
        let captions = CaptionTrack::with_config(parse_script(&script), config);

        let keywords_path = dir.join(KEYWORDS_FILE);
        let keywords = if keywords_path.exists() {
            KeywordIndex::from_json(&std::fs::read_to_string(&keywords_path)?)?
        } else {
            warn!(
                "No {} in {}, reading keyword markers from the script",
                KEYWORDS_FILE,
                dir.display()
            );
            KeywordIndex::from_script(&script)?
        };

        info!(
            "📄 Loaded {} captions and {} keywords from {}",
            captions.len(),
            keywords.len(),
            dir.display()
        );
        Ok(Self { captions, keywords })
    }
}
