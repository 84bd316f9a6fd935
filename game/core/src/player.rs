use crate::messages::{Encode, GcAppear, GcDisappear, GcLoginOk, GcMove};
use ferrite::logic::component::{Component, ComponentSet};
use ferrite::logic::event::Event;
use ferrite::logic::object::{GameLogic, GameObject, Sn};
use ferrite::net::SessionHandle;
use flint::logging;
use std::any::Any;

const ARRIVAL_THRESHOLD: f32 = 0.1;

/// Movement component: integrates the position toward a destination by
/// `move_speed` world units per fixed tick and pushes the result into the
/// owning scene's interest grid.
pub struct MoveComponent {
    x: f32,
    y: f32,
    z: f32,
    dest_x: f32,
    dest_y: f32,
    dest_z: f32,
    move_speed: f32,
    arrived_notified: bool,
    pub on_move_start: Event,
    pub on_arrived: Event,
}

impl MoveComponent {
    pub fn new(move_speed: f32) -> MoveComponent {
        MoveComponent {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            dest_x: 0.0,
            dest_y: 0.0,
            dest_z: 0.0,
            move_speed,
            arrived_notified: true,
            on_move_start: Event::new(),
            on_arrived: Event::new(),
        }
    }

    #[inline]
    pub fn position(&self) -> (f32, f32, f32) {
        (self.x, self.y, self.z)
    }

    pub fn set_position(&mut self, x: f32, y: f32, z: f32) {
        self.x = x;
        self.y = y;
        self.z = z;
    }

    /// Sets a new destination and fires the move-start event.
    pub fn set_destination(&mut self, x: f32, y: f32, z: f32) {
        self.dest_x = x;
        self.dest_y = y;
        self.dest_z = z;
        self.arrived_notified = false;
        self.on_move_start.invoke();
    }

    pub fn has_reached_destination(&self) -> bool {
        let dx = self.dest_x - self.x;
        let dz = self.dest_z - self.z;
        dx * dx + dz * dz < ARRIVAL_THRESHOLD * ARRIVAL_THRESHOLD
    }

    #[inline]
    pub fn is_moving(&self) -> bool {
        !self.has_reached_destination()
    }

    /// One fixed tick of movement. Returns true when the position changed;
    /// fires the arrived event once per destination.
    pub fn advance(&mut self) -> bool {
        if self.arrived_notified {
            return false;
        }

        let mut moved = false;
        if !self.has_reached_destination() {
            self.step_towards_destination();
            moved = true;
        }

        if self.has_reached_destination() {
            self.arrived_notified = true;
            self.on_arrived.invoke();
        }

        moved
    }

    fn step_towards_destination(&mut self) {
        let dx = self.dest_x - self.x;
        let dz = self.dest_z - self.z;
        let distance = (dx * dx + dz * dz).sqrt();

        if distance < 0.001 {
            return;
        }

        let step = if self.move_speed > distance { distance } else { self.move_speed };

        self.x += dx / distance * step;
        self.z += dz / distance * step;
    }
}

impl Component for MoveComponent {
    fn as_any(&mut self) -> &mut dyn Any {
        self
    }

    fn on_fixed_update(&mut self, obj: &GameObject) {
        if self.advance() {
            if let Some(scene) = obj.scene() {
                scene.update_position(obj, self.x, self.z);
            }
        }
    }
}

/// A connected player (or a server-side bot when it has no session).
/// Network handlers reach it exclusively through its job queue; movement
/// and interest updates run on its scene's logic thread.
pub struct Player {
    session: Option<SessionHandle>,
    name: String,
    x: f32,
    z: f32,
    move_speed: f32,
    components: ComponentSet,
    log: logging::Logger,
}

impl Player {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        session: SessionHandle,
        move_speed: f32,
        log: L,
    ) -> Player {
        Player {
            session: Some(session),
            name: String::new(),
            x: 0.0,
            z: 0.0,
            move_speed,
            components: ComponentSet::new(),
            log: logging::child(log),
        }
    }

    /// A player without a connection; used for server-driven actors.
    pub fn bot(name: &str, move_speed: f32) -> Player {
        Player {
            session: None,
            name: name.to_string(),
            x: 0.0,
            z: 0.0,
            move_speed,
            components: ComponentSet::new(),
            log: logging::null(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn send<M: Encode>(&self, message: &M) {
        if let Some(session) = &self.session {
            match message.to_payload() {
                Ok(payload) => session.send(payload),
                Err(err) => {
                    logging::warn!(self.log, "message encode failed";
                                   "context" => "send", "error" => ?err);
                }
            }
        }
    }

    /// Login request: record the name and acknowledge with the serial
    /// number peers will know this player by.
    pub fn handle_login(&mut self, obj: &GameObject, name: String) {
        logging::info!(self.log, "player logged in";
                       "context" => "login", "sn" => obj.sn(), "name" => %name);

        self.name = name;
        self.send(&GcLoginOk { sn: obj.sn() });
    }

    /// Move request: retarget the movement component.
    pub fn handle_move(&mut self, obj: &GameObject, x: f32, z: f32) {
        logging::debug!(self.log, "player move";
                        "context" => "move", "sn" => obj.sn(), "x" => x, "z" => z);

        if let Some(movement) = self.components.get::<MoveComponent>() {
            movement.set_destination(x, 0.0, z);
        }

        self.send(&GcMove { sn: obj.sn(), x, z });
    }
}

impl GameLogic for Player {
    fn as_any(&mut self) -> &mut dyn Any {
        self
    }

    fn position(&self) -> (f32, f32) {
        (self.x, self.z)
    }

    fn on_enter(&mut self, obj: &GameObject) {
        let mut movement = MoveComponent::new(self.move_speed);
        movement.set_position(self.x, 0.0, self.z);
        self.components.attach(movement, obj);
    }

    fn on_exit(&mut self, obj: &GameObject) {
        self.components.detach::<MoveComponent>(obj);
    }

    fn on_fixed_update(&mut self, obj: &GameObject) {
        self.components.fixed_update(obj);

        // Mirror the authoritative position out of the movement component.
        if let Some(movement) = self.components.get::<MoveComponent>() {
            let (x, _, z) = movement.position();
            self.x = x;
            self.z = z;
        }
    }

    fn on_update(&mut self, obj: &GameObject) {
        self.components.update(obj);
    }

    fn on_appear(&mut self, _obj: &GameObject, peers: &[Sn]) {
        for &sn in peers {
            self.send(&GcAppear { sn });
        }
    }

    fn on_disappear(&mut self, _obj: &GameObject, peers: &[Sn]) {
        for &sn in peers {
            self.send(&GcDisappear { sn });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_move_component_reaches_destination() {
        let mut movement = MoveComponent::new(1.0);
        movement.set_destination(3.0, 0.0, 4.0);

        assert!(movement.is_moving());

        // Unit speed over a 3-4-5 triangle: five ticks to arrive.
        let mut steps = 0;
        while movement.advance() {
            steps += 1;
            assert!(steps <= 6, "Runaway movement");
        }

        assert_eq!(steps, 5);
        assert!(movement.has_reached_destination());

        let (x, _, z) = movement.position();
        assert!((x - 3.0).abs() < ARRIVAL_THRESHOLD);
        assert!((z - 4.0).abs() < ARRIVAL_THRESHOLD);
    }

    #[test]
    fn test_move_component_overshoot_clamps() {
        let mut movement = MoveComponent::new(100.0);
        movement.set_destination(1.0, 0.0, 0.0);

        movement.advance();

        let (x, _, z) = movement.position();
        assert!((x - 1.0).abs() < 1e-5);
        assert_eq!(z, 0.0);
        assert!(movement.has_reached_destination());
    }

    #[test]
    fn test_move_events_fire_once_per_destination() {
        let mut movement = MoveComponent::new(1.0);

        let starts = Arc::new(AtomicUsize::new(0));
        let arrivals = Arc::new(AtomicUsize::new(0));

        let probe = starts.clone();
        let _start_token = movement.on_move_start.subscribe(move || {
            probe.fetch_add(1, Ordering::AcqRel);
        });
        let probe = arrivals.clone();
        let _arrive_token = movement.on_arrived.subscribe(move || {
            probe.fetch_add(1, Ordering::AcqRel);
        });

        movement.set_destination(2.0, 0.0, 0.0);
        assert_eq!(starts.load(Ordering::Acquire), 1);

        for _ in 0..10 {
            movement.advance();
        }

        assert_eq!(arrivals.load(Ordering::Acquire), 1);

        // Already arrived: further ticks are inert.
        movement.advance();
        assert_eq!(arrivals.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_bot_has_no_session() {
        let player = Player::bot("sentinel", 0.5);
        assert_eq!(player.name(), "sentinel");
        // Sending to nowhere must be a no-op, not a panic.
        player.send(&GcAppear { sn: 1 });
    }
}
