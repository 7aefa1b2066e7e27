//! Window, event loop and per-frame orchestration.
//!
//! Key bindings:
//! - WASD + mouse: walk and look (Shift to run, Space to jump)
//! - left / right mouse button: fire the blue / orange portal
//! - F1, F2: fixed observer cameras
//! - F4: rail camera circling the room
//! - M or F3: mount the camera on the prop under the crosshair
//! - F5 or F6: back to first person
//! - Escape: quit

use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::KeyCode;
use winit::window::{CursorGrabMode, Window, WindowAttributes, WindowId};

use glam::Vec3;
use hecs::Entity;

use crate::camera::{CameraRig, FirstPersonCamera};
use crate::compositor::{Compositor, PortalSide};
use crate::gpu::GpuContext;
use crate::input::Input;
use crate::intersect::Ray;
use crate::player::{MoveInput, PlayerController};
use crate::renderer::Renderer;
use crate::scene::Scene;

/// How close the player must stand to mount the camera on a prop.
const MOUNT_RANGE: f32 = 5.0;

const SPAWN: Vec3 = Vec3::new(0.0, 1.75, 5.0);

/// Configuration for the app window.
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Portico".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Runs the portal demo until the window closes.
pub fn run(config: AppConfig) {
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PorticoApp::Pending { config };
    event_loop.run_app(&mut app).expect("Event loop failed");
}

struct AppState {
    window: Arc<Window>,
    gpu: GpuContext,
    renderer: Renderer,
    scene: Scene,
    compositor: Compositor,
    input: Input,

    player: PlayerController,
    player_camera: FirstPersonCamera,
    /// Overrides the player's eye while set; `None` means first person.
    rig: Option<CameraRig>,
    /// Entity the mounted rig follows.
    mount_target: Option<Entity>,
    /// A pick pass has been requested for the next frame.
    pick_requested: bool,

    start_time: Instant,
    last_frame: Instant,
}

enum PorticoApp {
    Pending { config: AppConfig },
    Running(Box<AppState>),
}

impl ApplicationHandler for PorticoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let PorticoApp::Pending { config } = self {
            let window_attrs = WindowAttributes::default()
                .with_title(&config.title)
                .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));

            let window = Arc::new(
                event_loop
                    .create_window(window_attrs)
                    .expect("Failed to create window"),
            );

            // Lock the cursor for mouse look; fall back to confining it on
            // platforms without a lock.
            if window.set_cursor_grab(CursorGrabMode::Locked).is_err() {
                let _ = window.set_cursor_grab(CursorGrabMode::Confined);
            }
            window.set_cursor_visible(false);

            let gpu = GpuContext::new(window.clone());
            let renderer = Renderer::new(&gpu);
            let scene = Scene::new(&gpu);

            let mut compositor = Compositor::new();
            compositor.set_portal_angle(scene.portal_angle);
            log::info!(
                "scene ready: portal angle {:.3}, {} recursion levels",
                scene.portal_angle,
                compositor.iterations()
            );

            *self = PorticoApp::Running(Box::new(AppState {
                window,
                gpu,
                renderer,
                scene,
                compositor,
                input: Input::new(),
                player: PlayerController::new(SPAWN - Vec3::Y * 1.75),
                player_camera: FirstPersonCamera::new(SPAWN, 0.0),
                rig: None,
                mount_target: None,
                pick_requested: false,
                start_time: Instant::now(),
                last_frame: Instant::now(),
            }));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let PorticoApp::Running(state) = self else {
            return;
        };

        state.input.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                state.gpu.resize(size.width, size.height);
                state.renderer.resize(&state.gpu);
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let time = state.start_time.elapsed().as_secs_f32();
                // Clamp so a long stall cannot tunnel the player through
                // walls or the floor.
                let dt = now.duration_since(state.last_frame).as_secs_f32().min(0.1);
                state.last_frame = now;

                if state.input.key_pressed(KeyCode::Escape) {
                    event_loop.exit();
                    return;
                }

                state.update(dt, time);
                state.render(time);

                state.input.begin_frame();
                state.window.request_redraw();
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let PorticoApp::Running(state) = self {
            state.input.handle_device_event(&event);
        }
    }
}

impl AppState {
    fn update(&mut self, dt: f32, time: f32) {
        self.handle_camera_keys();

        // Mouse look goes to whichever camera is active.
        let motion = self.input.mouse_motion();
        match &mut self.rig {
            Some(rig) => rig.handle_mouse(motion.x, motion.y),
            None => self.player_camera.handle_mouse(motion.x, motion.y),
        }

        self.scene.update(time);

        if self.rig.is_none() {
            if self.input.key_pressed(KeyCode::Space) {
                self.player.jump();
            }
            let movement = MoveInput {
                forward: self.input.key_down(KeyCode::KeyW),
                backward: self.input.key_down(KeyCode::KeyS),
                left: self.input.key_down(KeyCode::KeyA),
                right: self.input.key_down(KeyCode::KeyD),
                run: self.input.key_down(KeyCode::ShiftLeft),
            };
            self.player.update(
                &mut self.player_camera,
                movement,
                dt,
                &self.scene.floor_collision,
                &self.scene.blue,
                &self.scene.orange,
            );

            if self.input.mouse_pressed(MouseButton::Left) {
                self.fire(PortalSide::Blue);
            }
            if self.input.mouse_pressed(MouseButton::Right) {
                self.fire(PortalSide::Orange);
            }
        }

        // Keep a mounted camera glued to its prop.
        if let (Some(rig), Some(target)) = (&mut self.rig, self.mount_target) {
            if let Some(position) = self.scene.entity_position(target) {
                rig.set_anchor(position);
            }
        }

        if self.input.key_pressed(KeyCode::KeyM) || self.input.key_pressed(KeyCode::F3) {
            self.pick_requested = true;
        }
    }

    fn handle_camera_keys(&mut self) {
        if self.input.key_pressed(KeyCode::F1) {
            self.rig = Some(CameraRig::Fixed {
                position: Vec3::new(0.0, 4.0, 8.0),
                target: Vec3::new(0.0, 1.0, -8.0),
            });
            self.mount_target = None;
        }
        if self.input.key_pressed(KeyCode::F2) {
            self.rig = Some(CameraRig::Fixed {
                position: Vec3::new(-11.0, 4.0, 9.0),
                target: Vec3::new(0.0, 1.0, -5.0),
            });
            self.mount_target = None;
        }
        if self.input.key_pressed(KeyCode::F4) {
            self.rig = Some(CameraRig::Rail {
                spline: self.scene.rail.clone(),
                speed: 0.3,
            });
            self.mount_target = None;
        }
        if self.input.key_pressed(KeyCode::F5) || self.input.key_pressed(KeyCode::F6) {
            self.rig = None;
            self.mount_target = None;
        }
    }

    fn fire(&mut self, side: PortalSide) {
        let ray = Ray::new(self.player_camera.position, self.player_camera.facing());
        if let Some(angle) = self.scene.fire_portal(side, &ray) {
            self.compositor.set_portal_angle(angle);
        }
    }

    fn render(&mut self, time: f32) {
        let (eye, view) = match &self.rig {
            Some(rig) => (rig.eye(time), rig.view_matrix(time)),
            None => (self.player_camera.position, self.player_camera.view_matrix()),
        };

        let pick = std::mem::take(&mut self.pick_requested);
        match self.renderer.render(
            &self.gpu,
            &self.scene,
            &self.compositor,
            eye,
            view,
            time,
            pick,
        ) {
            Ok(Some(entity)) => self.mount(entity),
            Ok(None) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let (w, h) = (self.gpu.width(), self.gpu.height());
                self.gpu.resize(w, h);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("out of GPU memory, shutting down");
                std::process::exit(1);
            }
            Err(e) => log::warn!("dropped frame: {e:?}"),
        }
    }

    fn mount(&mut self, entity: Entity) {
        let Some(anchor) = self.scene.entity_position(entity) else {
            return;
        };
        if anchor.distance(self.player_camera.position) > MOUNT_RANGE {
            log::debug!("pick target out of range");
            return;
        }
        log::info!("camera mounted on {entity:?}");
        self.rig = Some(CameraRig::Mounted {
            anchor,
            camera: FirstPersonCamera::new(anchor, self.player_camera.yaw()),
        });
        self.mount_target = Some(entity);
    }
}
