//! Player states and the pure transition table.
//!
//! [`transition`] decides what the player does; the control thread only executes the
//! returned effects in order.

use std::fmt;

/// Which track a skip fade ends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Current,
    Next,
    Prev,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Stopped,
    /// A track start has been issued; the device is not running yet.
    StartingPlayback,
    Playing,
    Paused,
    FadeOutToStop,
    FadeOutToTrack(Target),
}

impl State {
    /// Audio is (or is about to be) coming out of the device.
    pub fn is_running(self) -> bool {
        matches!(self, State::Playing | State::StartingPlayback)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Stopped => f.write_str("stopped"),
            State::StartingPlayback => f.write_str("starting"),
            State::Playing => f.write_str("playing"),
            State::Paused => f.write_str("paused"),
            State::FadeOutToStop => f.write_str("fading to stop"),
            State::FadeOutToTrack(t) => write!(f, "fading to {t:?}"),
        }
    }
}

/// Inputs to the state machine: user commands and device notices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Start,
    Pause,
    Resume,
    Stop,
    Next,
    Prev,
    DeviceActive,
    DeviceSuspended,
    DeviceIdle,
    TrackFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeKind {
    Stop,
    Skip,
}

/// Work the control thread performs after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    StartTrack,
    SuspendDevice,
    ResumeDevice,
    StopDevice,
    FadeOut(FadeKind),
    Advance(Direction),
    MarkUnplayable,
    /// Drop the finished track. Always last, so the old track outlives its idle dispatch.
    ReleaseTrack,
}

/// What the playlist can offer right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Neighbors {
    pub current: bool,
    pub next: bool,
    pub prev: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: State,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: State, effects: &[Effect]) -> Self {
        Self {
            next,
            effects: effects.to_vec(),
        }
    }

    fn stay(state: State) -> Self {
        Self::to(state, &[])
    }
}

/// Compute the next state and its effects.
pub fn transition(state: State, event: Event, around: Neighbors) -> Transition {
    use Effect::*;
    use State::*;

    match (state, event) {
        (Stopped, Event::Start) if around.current => {
            Transition::to(StartingPlayback, &[StartTrack])
        }
        (Paused, Event::Start) if around.current => {
            Transition::to(StartingPlayback, &[StartTrack, ReleaseTrack])
        }
        (Playing | StartingPlayback, Event::Start) => {
            Transition::to(FadeOutToTrack(Target::Current), &[FadeOut(FadeKind::Skip)])
        }
        (FadeOutToStop | FadeOutToTrack(_), Event::Start) => {
            Transition::stay(FadeOutToTrack(Target::Current))
        }

        (Playing | StartingPlayback, Event::Pause) => Transition::to(state, &[SuspendDevice]),
        (Paused, Event::Resume) => Transition::to(state, &[ResumeDevice]),

        (Playing | StartingPlayback, Event::Stop) => {
            Transition::to(FadeOutToStop, &[FadeOut(FadeKind::Stop)])
        }
        (FadeOutToTrack(_) | FadeOutToStop, Event::Stop) => {
            Transition::to(FadeOutToStop, &[StopDevice])
        }
        (Paused, Event::Stop) => Transition::to(state, &[StopDevice]),

        (_, Event::Next | Event::Prev) => {
            let (dir, target) = if event == Event::Next {
                (Direction::Next, Target::Next)
            } else {
                (Direction::Prev, Target::Prev)
            };
            match state {
                Playing | StartingPlayback => {
                    Transition::to(FadeOutToTrack(target), &[FadeOut(FadeKind::Skip)])
                }
                Paused => Transition::to(FadeOutToTrack(target), &[StopDevice]),
                Stopped => Transition::to(Stopped, &[Advance(dir)]),
                FadeOutToTrack(_) | FadeOutToStop => Transition::stay(state),
            }
        }

        (StartingPlayback | Paused, Event::DeviceActive) => Transition::stay(Playing),
        (Playing | StartingPlayback, Event::DeviceSuspended) => Transition::stay(Paused),

        (Playing | StartingPlayback, Event::DeviceIdle) => {
            if around.next {
                Transition::to(
                    StartingPlayback,
                    &[Advance(Direction::Next), StartTrack, ReleaseTrack],
                )
            } else {
                Transition::to(Stopped, &[ReleaseTrack])
            }
        }
        (FadeOutToStop | Paused, Event::DeviceIdle) => Transition::to(Stopped, &[ReleaseTrack]),
        (FadeOutToTrack(target), Event::DeviceIdle) => match target {
            Target::Current if around.current => {
                Transition::to(StartingPlayback, &[StartTrack, ReleaseTrack])
            }
            Target::Next if around.next => Transition::to(
                StartingPlayback,
                &[Advance(Direction::Next), StartTrack, ReleaseTrack],
            ),
            Target::Prev if around.prev => Transition::to(
                StartingPlayback,
                &[Advance(Direction::Prev), StartTrack, ReleaseTrack],
            ),
            _ => Transition::to(Stopped, &[ReleaseTrack]),
        },

        (StartingPlayback, Event::TrackFailed) => {
            if around.next {
                Transition::to(
                    StartingPlayback,
                    &[MarkUnplayable, Advance(Direction::Next), StartTrack, ReleaseTrack],
                )
            } else {
                Transition::to(Stopped, &[MarkUnplayable, ReleaseTrack])
            }
        }
        // The pending fade or stop still ends in an idle report.
        (FadeOutToTrack(_) | FadeOutToStop, Event::TrackFailed) => {
            Transition::to(state, &[MarkUnplayable])
        }

        _ => Transition::stay(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Effect::*;
    use State::*;

    const ALL: Neighbors = Neighbors {
        current: true,
        next: true,
        prev: true,
    };
    const ALONE: Neighbors = Neighbors {
        current: true,
        next: false,
        prev: false,
    };

    fn check(state: State, event: Event, around: Neighbors, next: State, effects: &[Effect]) {
        let t = transition(state, event, around);
        assert_eq!(t.next, next, "{state:?} + {event:?}");
        assert_eq!(t.effects, effects, "{state:?} + {event:?}");
    }

    #[test]
    fn start_from_rest() {
        check(Stopped, Event::Start, ALL, StartingPlayback, &[StartTrack]);
        check(Paused, Event::Start, ALL, StartingPlayback, &[StartTrack, ReleaseTrack]);
        check(Stopped, Event::Start, Neighbors::default(), Stopped, &[]);
    }

    #[test]
    fn start_while_running_restarts_through_a_fade() {
        for s in [Playing, StartingPlayback] {
            check(
                s,
                Event::Start,
                ALL,
                FadeOutToTrack(Target::Current),
                &[FadeOut(FadeKind::Skip)],
            );
        }
        check(FadeOutToStop, Event::Start, ALL, FadeOutToTrack(Target::Current), &[]);
        check(
            FadeOutToTrack(Target::Next),
            Event::Start,
            ALL,
            FadeOutToTrack(Target::Current),
            &[],
        );
    }

    #[test]
    fn pause_and_resume_only_touch_the_device() {
        check(Playing, Event::Pause, ALL, Playing, &[SuspendDevice]);
        check(StartingPlayback, Event::Pause, ALL, StartingPlayback, &[SuspendDevice]);
        check(Paused, Event::Resume, ALL, Paused, &[ResumeDevice]);
        check(Stopped, Event::Pause, ALL, Stopped, &[]);
        check(Playing, Event::Resume, ALL, Playing, &[]);
    }

    #[test]
    fn stop_fades_unless_already_fading_or_paused() {
        check(Playing, Event::Stop, ALL, FadeOutToStop, &[FadeOut(FadeKind::Stop)]);
        check(FadeOutToStop, Event::Stop, ALL, FadeOutToStop, &[StopDevice]);
        check(FadeOutToTrack(Target::Prev), Event::Stop, ALL, FadeOutToStop, &[StopDevice]);
        check(Paused, Event::Stop, ALL, Paused, &[StopDevice]);
        check(Stopped, Event::Stop, ALL, Stopped, &[]);
    }

    #[test]
    fn skipping() {
        check(
            Playing,
            Event::Next,
            ALL,
            FadeOutToTrack(Target::Next),
            &[FadeOut(FadeKind::Skip)],
        );
        check(Paused, Event::Prev, ALL, FadeOutToTrack(Target::Prev), &[StopDevice]);
        check(Stopped, Event::Next, ALL, Stopped, &[Advance(Direction::Next)]);
        check(Stopped, Event::Prev, ALL, Stopped, &[Advance(Direction::Prev)]);
        check(
            FadeOutToTrack(Target::Next),
            Event::Prev,
            ALL,
            FadeOutToTrack(Target::Next),
            &[],
        );
    }

    #[test]
    fn device_reports() {
        check(StartingPlayback, Event::DeviceActive, ALL, Playing, &[]);
        check(Paused, Event::DeviceActive, ALL, Playing, &[]);
        check(Playing, Event::DeviceSuspended, ALL, Paused, &[]);
        check(Stopped, Event::DeviceActive, ALL, Stopped, &[]);
    }

    #[test]
    fn idle_advances_or_stops() {
        check(
            Playing,
            Event::DeviceIdle,
            ALL,
            StartingPlayback,
            &[Advance(Direction::Next), StartTrack, ReleaseTrack],
        );
        check(Playing, Event::DeviceIdle, ALONE, Stopped, &[ReleaseTrack]);
        check(FadeOutToStop, Event::DeviceIdle, ALL, Stopped, &[ReleaseTrack]);
        check(Paused, Event::DeviceIdle, ALL, Stopped, &[ReleaseTrack]);
        check(Stopped, Event::DeviceIdle, ALL, Stopped, &[]);
    }

    #[test]
    fn idle_after_skip_fade_lands_on_target() {
        check(
            FadeOutToTrack(Target::Current),
            Event::DeviceIdle,
            ALONE,
            StartingPlayback,
            &[StartTrack, ReleaseTrack],
        );
        check(
            FadeOutToTrack(Target::Prev),
            Event::DeviceIdle,
            ALL,
            StartingPlayback,
            &[Advance(Direction::Prev), StartTrack, ReleaseTrack],
        );
        check(
            FadeOutToTrack(Target::Next),
            Event::DeviceIdle,
            ALONE,
            Stopped,
            &[ReleaseTrack],
        );
    }

    #[test]
    fn failed_start_skips_to_next() {
        check(
            StartingPlayback,
            Event::TrackFailed,
            ALL,
            StartingPlayback,
            &[MarkUnplayable, Advance(Direction::Next), StartTrack, ReleaseTrack],
        );
        check(
            StartingPlayback,
            Event::TrackFailed,
            ALONE,
            Stopped,
            &[MarkUnplayable, ReleaseTrack],
        );
        check(Playing, Event::TrackFailed, ALL, Playing, &[]);
    }

    #[test]
    fn failure_during_a_fade_still_marks_the_track() {
        for s in [
            FadeOutToStop,
            FadeOutToTrack(Target::Current),
            FadeOutToTrack(Target::Next),
        ] {
            check(s, Event::TrackFailed, ALL, s, &[MarkUnplayable]);
        }
    }

    #[test]
    fn release_is_always_last() {
        let states = [
            Stopped,
            StartingPlayback,
            Playing,
            Paused,
            FadeOutToStop,
            FadeOutToTrack(Target::Current),
            FadeOutToTrack(Target::Next),
            FadeOutToTrack(Target::Prev),
        ];
        let events = [
            Event::Start,
            Event::Pause,
            Event::Resume,
            Event::Stop,
            Event::Next,
            Event::Prev,
            Event::DeviceActive,
            Event::DeviceSuspended,
            Event::DeviceIdle,
            Event::TrackFailed,
        ];
        for s in states {
            for e in events {
                for around in [ALL, ALONE, Neighbors::default()] {
                    let t = transition(s, e, around);
                    if let Some(i) = t.effects.iter().position(|x| *x == ReleaseTrack) {
                        assert_eq!(i, t.effects.len() - 1, "{s:?} + {e:?}");
                    }
                }
            }
        }
    }
}
