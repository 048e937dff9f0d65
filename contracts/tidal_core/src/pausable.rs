use soroban_sdk::Env;
use tidal_errors::ContractError;

use crate::events;
use crate::types::{DataKey, Pause};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PauseAction {
    Bond,
    Unbond,
    Tick,
}

pub fn pause_info(e: &Env) -> Pause {
    e.storage()
        .instance()
        .get(&DataKey::Pause)
        .unwrap_or_default()
}

pub fn is_paused(e: &Env, action: PauseAction) -> bool {
    let pause = pause_info(e);
    match action {
        PauseAction::Bond => pause.bond,
        PauseAction::Unbond => pause.unbond,
        PauseAction::Tick => pause.tick,
    }
}

pub fn require_not_paused(e: &Env, action: PauseAction) -> Result<(), ContractError> {
    if is_paused(e, action) {
        return Err(ContractError::Paused);
    }
    Ok(())
}

/// Callers check admin authorization first.
pub fn set_pause(e: &Env, pause: &Pause) {
    e.storage().instance().set(&DataKey::Pause, pause);
    events::emit_pause_changed(e, pause);
}

pub fn pause_all(e: &Env) {
    set_pause(
        e,
        &Pause {
            bond: true,
            unbond: true,
            tick: true,
        },
    );
}

pub fn unpause_all(e: &Env) {
    set_pause(e, &Pause::default());
}
