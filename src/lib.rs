//! # Portico
//!
//! A recursive portal renderer built on wgpu's stencil buffer.
//!
//! Two linked elliptical portals cut into the walls of a room. Everything
//! visible through a portal, including further portals, is rendered into the
//! same framebuffer: each level of recursion stamps a region of the stencil
//! buffer with a branch id and later draws restrict themselves to the pixels
//! carrying that id. A first person player can walk and fall through the
//! portals, fire them onto other walls, and hand the camera to fixed, rail
//! or prop-mounted rigs.
//!
//! ## Quick Start
//!
//! ```no_run
//! fn main() {
//!     env_logger::init();
//!     portico::run(portico::AppConfig::new().title("Portico"));
//! }
//! ```
//!
//! The interesting pieces, bottom up:
//!
//! - [`spline`]: cyclic Catmull-Rom curves driving props and the rail camera
//! - [`intersect`]: ray and triangle-mesh collision queries
//! - [`portal`]: the portal pair, its teleport transforms and crossing test
//! - [`compositor`]: the recursion schedule over an abstract masked-draw sink
//! - [`renderer`]: the wgpu stencil pipelines that realize the schedule

pub mod app;
pub mod assets;
pub mod camera;
pub mod compositor;
pub mod gpu;
pub mod input;
pub mod intersect;
pub mod mesh;
pub mod player;
pub mod portal;
pub mod renderer;
pub mod scene;
pub mod spline;
pub mod texture;

pub use app::{AppConfig, run};
pub use assets::{Assets, MeshId, TextureId};
pub use camera::{CameraRig, FirstPersonCamera};
pub use compositor::{Compositor, MaskedDraw, PortalSide};
pub use gpu::GpuContext;
pub use input::Input;
pub use intersect::{Hit, Ray, TriMesh};
pub use mesh::{Geometry, Mesh, Transform, Vertex3d};
pub use player::{MoveInput, PlayerController};
pub use portal::Portal;
pub use renderer::Renderer;
pub use scene::Scene;
pub use spline::Spline;
pub use texture::Texture;

// Re-export the math types that appear throughout the public API.
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

pub use hecs::{Entity, World};
