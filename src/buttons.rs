//! Button board - configured press/release message lists
//!
//! Presses are debounced across the whole board: a press closer than
//! `debounce` to the previous press is ignored, whichever button it hits.
//! Releases are never debounced so a held button is always let go.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ButtonConfig;
use crate::error::ButtonError;
use crate::router::RoutingResult;
use crate::session::SessionManager;

/// First controller number handed to buttons added at runtime
const ADDED_BUTTON_CC_BASE: u32 = 70;

pub struct ButtonBoard {
    buttons: Vec<ButtonConfig>,
    held: BTreeSet<u32>,
    debounce: Duration,
    last_press: Option<Instant>,
}

impl ButtonBoard {
    pub fn new(buttons: Vec<ButtonConfig>, debounce: Duration) -> Self {
        Self {
            buttons,
            held: BTreeSet::new(),
            debounce,
            last_press: None,
        }
    }

    pub fn buttons(&self) -> &[ButtonConfig] {
        &self.buttons
    }

    pub fn get(&self, id: u32) -> Option<&ButtonConfig> {
        self.buttons.iter().find(|b| b.id == id)
    }

    pub fn is_held(&self, id: u32) -> bool {
        self.held.contains(&id)
    }

    pub fn held(&self) -> impl Iterator<Item = u32> + '_ {
        self.held.iter().copied()
    }

    /// Swap in a new button set, e.g. after a config reload.
    /// Held state survives only for buttons that still exist.
    pub fn replace(&mut self, buttons: Vec<ButtonConfig>, debounce: Duration) {
        self.held.retain(|id| buttons.iter().any(|b| b.id == *id));
        self.buttons = buttons;
        self.debounce = debounce;
    }

    pub fn press(
        &mut self,
        session: &SessionManager,
        id: u32,
    ) -> Result<Vec<RoutingResult>, ButtonError> {
        self.press_at(session, id, Instant::now())
    }

    fn press_at(
        &mut self,
        session: &SessionManager,
        id: u32,
        now: Instant,
    ) -> Result<Vec<RoutingResult>, ButtonError> {
        if let Some(last) = self.last_press {
            if now.saturating_duration_since(last) < self.debounce {
                debug!("Press on button {} ignored (debounce)", id);
                return Err(ButtonError::Debounced);
            }
        }
        // Counts as a press even if rejected below
        self.last_press = Some(now);

        if session.outputs().is_empty() {
            warn!("Button {} pressed with no output devices", id);
            return Err(ButtonError::NoOutputs);
        }

        let button = self.get(id).ok_or(ButtonError::UnknownButton(id))?;
        let results = session.send_many(&button.press);
        self.held.insert(id);
        Ok(results)
    }

    pub fn release(
        &mut self,
        session: &SessionManager,
        id: u32,
    ) -> Result<Vec<RoutingResult>, ButtonError> {
        let button = self.get(id).ok_or(ButtonError::UnknownButton(id))?;
        let results = session.send_many(&button.release);
        self.held.remove(&id);
        Ok(results)
    }

    /// Append a momentary CC button on the next free id
    pub fn add_button(&mut self) -> Result<&ButtonConfig, ButtonError> {
        let id = self
            .buttons
            .iter()
            .map(|b| b.id + 1)
            .max()
            .unwrap_or(0);
        let controller = u8::try_from(ADDED_BUTTON_CC_BASE + id)
            .ok()
            .filter(|cc| *cc <= 127)
            .ok_or(ButtonError::ControllerExhausted(id))?;

        let index = self.buttons.len();
        self.buttons.push(ButtonConfig::momentary_cc(
            id,
            format!("Button {}", id + 1),
            0,
            controller,
        ));
        info!("Added button {} (CC{})", id, controller);
        Ok(&self.buttons[index])
    }

    /// Remove a button; returns whether it existed
    pub fn remove_button(&mut self, id: u32) -> bool {
        let before = self.buttons.len();
        self.buttons.retain(|b| b.id != id);
        self.held.remove(&id);
        self.buttons.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::platform::VirtualPlatform;
    use std::sync::Arc;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    async fn connected() -> (VirtualPlatform, SessionManager) {
        let platform = VirtualPlatform::new();
        platform.add_output("out-synth", "Synth");
        let session = SessionManager::new(Arc::new(platform.clone()));
        session.connect().await.unwrap();
        (platform, session)
    }

    fn board() -> ButtonBoard {
        ButtonBoard::new(AppConfig::default().buttons, DEBOUNCE)
    }

    #[tokio::test]
    async fn test_press_and_release_send_lists() {
        let (platform, session) = connected().await;
        let mut board = board();

        let pressed = board.press(&session, 0).unwrap();
        assert_eq!(pressed.len(), 1);
        assert_eq!(pressed[0].message.as_bytes(), &[0xB0, 64, 127]);
        assert!(board.is_held(0));

        let released = board.release(&session, 0).unwrap();
        assert_eq!(released[0].message.as_bytes(), &[0xB0, 64, 0]);
        assert!(!board.is_held(0));
        assert_eq!(platform.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_rapid_presses_are_debounced() {
        let (platform, session) = connected().await;
        let mut board = board();
        let start = Instant::now();

        assert!(board.press_at(&session, 0, start).is_ok());
        assert_eq!(
            board.press_at(&session, 1, start + Duration::from_millis(100)),
            Err(ButtonError::Debounced)
        );
        assert!(board
            .press_at(&session, 1, start + Duration::from_millis(400))
            .is_ok());
        assert_eq!(platform.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_release_is_not_debounced() {
        let (_platform, session) = connected().await;
        let mut board = board();

        board.press(&session, 0).unwrap();
        assert!(board.release(&session, 0).is_ok());
        assert!(board.release(&session, 0).is_ok());
    }

    #[tokio::test]
    async fn test_press_without_outputs_is_rejected() {
        let platform = VirtualPlatform::new();
        let session = SessionManager::new(Arc::new(platform.clone()));
        session.connect().await.unwrap();
        let mut board = board();

        assert_eq!(board.press(&session, 0), Err(ButtonError::NoOutputs));
        assert!(!board.is_held(0));
    }

    #[tokio::test]
    async fn test_unknown_button() {
        let (_platform, session) = connected().await;
        let mut board = board();

        assert_eq!(board.press(&session, 9), Err(ButtonError::UnknownButton(9)));
        assert_eq!(board.release(&session, 9), Err(ButtonError::UnknownButton(9)));
    }

    #[test]
    fn test_add_button_uses_next_id() {
        let mut board = board();
        let added = board.add_button().unwrap().clone();

        assert_eq!(added.id, 2);
        assert_eq!(added.label, "Button 3");
        assert_eq!(added.press[0].encode().unwrap().as_bytes(), &[0xB0, 72, 127]);
        assert_eq!(added.release[0].encode().unwrap().as_bytes(), &[0xB0, 72, 0]);
    }

    #[test]
    fn test_add_button_on_empty_board() {
        let mut board = ButtonBoard::new(Vec::new(), DEBOUNCE);
        assert_eq!(board.add_button().unwrap().id, 0);
    }

    #[test]
    fn test_add_button_runs_out_of_controllers() {
        let mut board = ButtonBoard::new(
            vec![ButtonConfig::momentary_cc(57, "Last", 0, 127)],
            DEBOUNCE,
        );
        assert_eq!(board.add_button(), Err(ButtonError::ControllerExhausted(58)));
    }

    #[tokio::test]
    async fn test_remove_and_replace_clear_held() {
        let (_platform, session) = connected().await;
        let mut board = board();
        board.press(&session, 0).unwrap();

        assert!(board.remove_button(0));
        assert!(!board.remove_button(0));
        assert!(!board.is_held(0));

        board.replace(AppConfig::default().buttons, DEBOUNCE);
        assert_eq!(board.buttons().len(), 2);
        assert_eq!(board.held().count(), 0);
    }
}
