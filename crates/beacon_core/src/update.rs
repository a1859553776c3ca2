use crate::{FetchEffect, FetchMachine, FetchMsg, Misuse, Settlement};

/// Pure update function: applies a message to a fetch machine and returns the
/// effects the engine must run.
pub fn update<T, E>(
    mut machine: FetchMachine<T, E>,
    msg: FetchMsg<T, E>,
) -> (FetchMachine<T, E>, Vec<FetchEffect>) {
    if machine.is_torn_down() {
        return (machine, Vec::new());
    }

    let mut effects = Vec::new();
    match msg {
        FetchMsg::Execute => restart(&mut machine, &mut effects),
        FetchMsg::Refetch => {
            if machine.target().locator.is_some() {
                restart(&mut machine, &mut effects);
            } else {
                effects.push(FetchEffect::Warn(Misuse::RefetchWithoutLocator));
            }
        }
        FetchMsg::SetLocator(locator) => {
            machine.set_locator(locator);
            restart(&mut machine, &mut effects);
        }
        FetchMsg::SetConfig(config) => {
            machine.set_config(config);
            restart(&mut machine, &mut effects);
        }
        FetchMsg::SetTarget(target) => {
            machine.set_target(target);
            restart(&mut machine, &mut effects);
        }
        FetchMsg::Settled {
            request_id,
            settlement,
        } => {
            // Anything but the newest request is stale and must not touch state.
            if machine.in_flight() != Some(request_id) {
                return (machine, effects);
            }
            machine.take_in_flight();
            match settlement {
                Settlement::Success(data) => machine.succeed(data),
                Settlement::Cancelled => machine.stop_loading(),
                Settlement::Failed(error) => machine.fail(error),
            }
        }
        FetchMsg::Teardown => {
            if let Some(request_id) = machine.take_in_flight() {
                effects.push(FetchEffect::Cancel { request_id });
            }
            machine.stop_loading();
            machine.tear_down();
        }
    }

    (machine, effects)
}

/// Supersedes whatever is in flight and starts over from the current target.
fn restart<T, E>(machine: &mut FetchMachine<T, E>, effects: &mut Vec<FetchEffect>) {
    if let Some(request_id) = machine.take_in_flight() {
        effects.push(FetchEffect::Cancel { request_id });
    }

    match machine.target().locator.clone() {
        Some(locator) => {
            let config = machine.target().config.clone();
            let request_id = machine.begin_request();
            effects.push(FetchEffect::Issue {
                request_id,
                locator,
                config,
            });
        }
        None => machine.reset(),
    }
}
