pub mod config;
pub mod error;
pub mod idealized;
pub mod invariant;
pub mod landmask;
pub mod mask;
pub mod model;
pub mod nonveg;
pub mod overwrite;
pub mod reader;
pub mod session;
pub mod vegetation;
pub mod writer;

pub use config::ModifyConfig;
pub use error::{ModifyError, Result};
pub use landmask::LandMask;
pub use mask::{GridMask, Rectangle, SelectionMask};
pub use model::{Dataset, Field};
pub use overwrite::OverwriteValue;
pub use reader::read_fsurdat;
pub use session::{run, ModificationSession, ScalarOverrides, SessionState};
pub use vegetation::VegetationTraits;
pub use writer::FsurdatWriter;
