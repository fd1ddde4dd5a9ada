//! Schedule allocation for global phases.
//!
//! [`ScheduleAllocator`] keeps the cronograma of a cycle contiguous in
//! `order`: a phase may only start after its configured predecessor ends
//! and must end before its configured successor starts. Unconfigured
//! neighbors impose no bound, but no window may overlap any configured
//! phase of the cycle.
//!
//! The display status of a phase is a projection of its dates onto
//! "today" and is recomputed on every call.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::RangeError;
use crate::models::{GlobalPhase, PhaseSchedule, PhaseWithSchedule, ScheduleInput, ScheduleStatus};

/// Bounds a schedule for one phase must respect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleConstraints {
    pub min_start: NaiveDate,
    /// `None` when the next phase has no schedule yet.
    pub max_end: Option<NaiveDate>,
}

/// Pure schedule logic evaluated against a fixed "today".
#[derive(Debug, Clone, Copy)]
pub struct ScheduleAllocator {
    today: NaiveDate,
}

impl ScheduleAllocator {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Compute the allowed window for `phase` given every phase of the cycle.
    pub fn compute_constraints(
        &self,
        phase: &GlobalPhase,
        all: &[PhaseWithSchedule],
    ) -> ScheduleConstraints {
        let previous_end = phase
            .order
            .checked_sub(1)
            .and_then(|order| scheduled_with_order(all, order))
            .map(|s| next_day(s.end_date));

        let min_start = match previous_end {
            Some(day) if day > self.today => day,
            _ => self.today,
        };

        let max_end = phase
            .order
            .checked_add(1)
            .and_then(|order| scheduled_with_order(all, order))
            .map(|s| previous_day(s.start_date));

        debug!(
            phase = %phase.code,
            %min_start,
            max_end = ?max_end,
            "computed schedule constraints"
        );

        ScheduleConstraints { min_start, max_end }
    }

    /// Check a requested window against previously computed constraints.
    pub fn validate(
        &self,
        input: &ScheduleInput,
        constraints: &ScheduleConstraints,
    ) -> Result<(), RangeError> {
        if input.end_date < input.start_date {
            return Err(RangeError::EndBeforeStart {
                start: input.start_date,
                end: input.end_date,
            });
        }
        if input.start_date < constraints.min_start {
            return Err(RangeError::StartTooEarly {
                start: input.start_date,
                min_start: constraints.min_start,
                max_end: constraints.max_end,
            });
        }
        if let Some(max_end) = constraints.max_end {
            if input.end_date > max_end {
                return Err(RangeError::EndTooLate {
                    end: input.end_date,
                    min_start: constraints.min_start,
                    max_end,
                });
            }
        }
        Ok(())
    }

    /// Check `input` for `phase` against every other configured phase.
    ///
    /// [`compute_constraints`](Self::compute_constraints) only bounds by the
    /// immediate neighbors; a phase further away in `order` must still end
    /// before this window starts (or start after it ends).
    pub fn check_non_overlap(
        &self,
        phase: &GlobalPhase,
        input: &ScheduleInput,
        all: &[PhaseWithSchedule],
    ) -> Result<(), RangeError> {
        let conflict = all
            .iter()
            .filter(|p| p.phase.id != phase.id)
            .filter_map(|p| p.schedule.as_ref().map(|s| (&p.phase, s)))
            .find(|(other, s)| {
                if other.order < phase.order {
                    s.end_date >= input.start_date
                } else {
                    s.start_date <= input.end_date
                }
            });

        match conflict {
            Some((other, s)) => Err(RangeError::Overlaps {
                start: input.start_date,
                end: input.end_date,
                conflicting: other.name.clone(),
                conflicting_start: s.start_date,
                conflicting_end: s.end_date,
            }),
            None => Ok(()),
        }
    }

    /// Derive the display status of a (possibly missing) schedule.
    pub fn derive_status(&self, schedule: Option<&PhaseSchedule>) -> ScheduleStatus {
        match schedule {
            None => ScheduleStatus::SinConfigurar,
            Some(s) if self.today > s.end_date => ScheduleStatus::Finalizada,
            Some(s) if self.today >= s.start_date => ScheduleStatus::Activa,
            Some(_) => ScheduleStatus::Pendiente,
        }
    }

    /// The phase whose window covers today, if any.
    ///
    /// Non-overlap makes this unique. If stored data violates it, the
    /// lowest `order` wins and a warning is logged.
    pub fn current_active_phase<'a>(
        &self,
        all: &'a [PhaseWithSchedule],
    ) -> Option<&'a GlobalPhase> {
        let mut active: Vec<&PhaseWithSchedule> = all
            .iter()
            .filter(|p| self.derive_status(p.schedule.as_ref()) == ScheduleStatus::Activa)
            .collect();
        active.sort_by_key(|p| p.phase.order);

        if active.len() > 1 {
            warn!(
                count = active.len(),
                phases = ?active.iter().map(|p| p.phase.code.as_str()).collect::<Vec<_>>(),
                "more than one phase is active; schedules overlap"
            );
        }
        active.first().map(|p| &p.phase)
    }
}

fn scheduled_with_order(all: &[PhaseWithSchedule], order: u32) -> Option<&PhaseSchedule> {
    all.iter()
        .find(|p| p.phase.order == order)
        .and_then(|p| p.schedule.as_ref())
}

fn next_day(day: NaiveDate) -> NaiveDate {
    day.checked_add_days(Days::new(1)).unwrap_or(day)
}

fn previous_day(day: NaiveDate) -> NaiveDate {
    day.checked_sub_days(Days::new(1)).unwrap_or(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn phase(id: i64, code: &str, order: u32) -> GlobalPhase {
        GlobalPhase {
            id,
            gestion_id: 1,
            code: code.into(),
            name: code.into(),
            order,
        }
    }

    fn with(phase: GlobalPhase, window: Option<(&str, &str)>) -> PhaseWithSchedule {
        let schedule = window.map(|(start, end)| PhaseSchedule {
            id: phase.id * 10,
            global_phase_id: phase.id,
            start_date: day(start),
            end_date: day(end),
        });
        PhaseWithSchedule { phase, schedule }
    }

    fn input(start: &str, end: &str) -> ScheduleInput {
        ScheduleInput {
            start_date: day(start),
            end_date: day(end),
        }
    }

    #[test]
    fn test_constraints_bounded_by_configured_successor() {
        let today = day("2025-01-10");
        let all = vec![
            with(phase(1, "CONFIGURACION", 1), None),
            with(phase(2, "EVALUACION", 2), Some(("2025-03-01", "2025-03-31"))),
        ];
        let alloc = ScheduleAllocator::new(today);
        let c = alloc.compute_constraints(&all[0].phase, &all);
        assert_eq!(
            c,
            ScheduleConstraints {
                min_start: today,
                max_end: Some(day("2025-02-28")),
            }
        );
    }

    #[test]
    fn test_constraints_bounded_by_configured_predecessor() {
        let all = vec![
            with(phase(1, "CONFIGURACION", 1), Some(("2025-02-01", "2025-02-20"))),
            with(phase(2, "EVALUACION", 2), None),
            with(phase(3, "FINAL", 3), None),
        ];
        let alloc = ScheduleAllocator::new(day("2025-01-10"));
        let c = alloc.compute_constraints(&all[1].phase, &all);
        assert_eq!(c.min_start, day("2025-02-21"));
        assert_eq!(c.max_end, None);
    }

    #[test]
    fn test_min_start_never_before_today() {
        let all = vec![
            with(phase(1, "CONFIGURACION", 1), Some(("2025-01-01", "2025-01-05"))),
            with(phase(2, "EVALUACION", 2), None),
        ];
        let alloc = ScheduleAllocator::new(day("2025-01-20"));
        let c = alloc.compute_constraints(&all[1].phase, &all);
        assert_eq!(c.min_start, day("2025-01-20"));
    }

    #[test]
    fn test_unconfigured_neighbors_impose_no_bound() {
        // FINAL is configured but is not the immediate neighbor of CONFIGURACION.
        let all = vec![
            with(phase(1, "CONFIGURACION", 1), None),
            with(phase(2, "EVALUACION", 2), None),
            with(phase(3, "FINAL", 3), Some(("2025-02-01", "2025-02-10"))),
        ];
        let alloc = ScheduleAllocator::new(day("2025-01-01"));
        let c = alloc.compute_constraints(&all[0].phase, &all);
        assert_eq!(c.max_end, None);
    }

    #[test]
    fn test_validate_rejections() {
        let alloc = ScheduleAllocator::new(day("2025-01-10"));
        let c = ScheduleConstraints {
            min_start: day("2025-01-10"),
            max_end: Some(day("2025-02-28")),
        };

        assert!(matches!(
            alloc.validate(&input("2025-02-10", "2025-02-01"), &c),
            Err(RangeError::EndBeforeStart { .. })
        ));
        assert_eq!(
            alloc.validate(&input("2025-01-09", "2025-02-01"), &c),
            Err(RangeError::StartTooEarly {
                start: day("2025-01-09"),
                min_start: day("2025-01-10"),
                max_end: Some(day("2025-02-28")),
            })
        );
        assert!(matches!(
            alloc.validate(&input("2025-02-01", "2025-03-01"), &c),
            Err(RangeError::EndTooLate { .. })
        ));
        assert!(alloc.validate(&input("2025-01-10", "2025-02-28"), &c).is_ok());
        // Single-day window.
        assert!(alloc.validate(&input("2025-01-15", "2025-01-15"), &c).is_ok());
    }

    #[test]
    fn test_derive_status_boundaries() {
        let s = PhaseSchedule {
            id: 1,
            global_phase_id: 1,
            start_date: day("2025-03-01"),
            end_date: day("2025-03-31"),
        };
        let at = |d: &str| ScheduleAllocator::new(day(d)).derive_status(Some(&s));
        assert_eq!(at("2025-02-28"), ScheduleStatus::Pendiente);
        assert_eq!(at("2025-03-01"), ScheduleStatus::Activa);
        assert_eq!(at("2025-03-31"), ScheduleStatus::Activa);
        assert_eq!(at("2025-04-01"), ScheduleStatus::Finalizada);
        assert_eq!(
            ScheduleAllocator::new(day("2025-03-15")).derive_status(None),
            ScheduleStatus::SinConfigurar
        );
    }

    #[test]
    fn test_current_active_phase() {
        let all = vec![
            with(phase(1, "CONFIGURACION", 1), Some(("2025-01-01", "2025-01-31"))),
            with(phase(2, "EVALUACION", 2), Some(("2025-02-01", "2025-02-28"))),
            with(phase(3, "FINAL", 3), None),
        ];
        let active = ScheduleAllocator::new(day("2025-02-10")).current_active_phase(&all);
        assert_eq!(active.map(|p| p.code.as_str()), Some("EVALUACION"));

        let gap = ScheduleAllocator::new(day("2025-03-10")).current_active_phase(&all);
        assert!(gap.is_none());
    }

    #[test]
    fn test_validated_schedules_never_overlap() {
        // Schedule phases in every order; anything accepted must keep
        // every pair of configured phases apart.
        let today = day("2025-01-01");
        let alloc = ScheduleAllocator::new(today);
        let windows = [
            ("2025-01-01", "2025-01-31"),
            ("2025-01-20", "2025-02-15"),
            ("2025-02-01", "2025-02-28"),
            ("2025-03-01", "2025-03-10"),
            ("2025-02-20", "2025-03-05"),
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            for wi in 0..windows.len() {
                let mut all = vec![
                    with(phase(1, "CONFIGURACION", 1), None),
                    with(phase(2, "EVALUACION", 2), None),
                    with(phase(3, "FINAL", 3), None),
                ];
                for (step, &idx) in order.iter().enumerate() {
                    let (start, end) = windows[(wi + step) % windows.len()];
                    let target = all[idx].phase.clone();
                    let c = alloc.compute_constraints(&target, &all);
                    let req = input(start, end);
                    let accepted = alloc.validate(&req, &c).is_ok()
                        && alloc.check_non_overlap(&target, &req, &all).is_ok();
                    if accepted {
                        all[idx].schedule = Some(PhaseSchedule {
                            id: target.id,
                            global_phase_id: target.id,
                            start_date: req.start_date,
                            end_date: req.end_date,
                        });
                    }
                }
                for (i, a) in all.iter().enumerate() {
                    for b in &all[i + 1..] {
                        if let (Some(sa), Some(sb)) = (&a.schedule, &b.schedule) {
                            assert!(
                                sa.end_date < sb.start_date,
                                "{} overlaps {} for order {:?}",
                                a.phase.code,
                                b.phase.code,
                                order
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_non_overlap_checks_distant_phases() {
        let all = vec![
            with(phase(1, "CONFIGURACION", 1), Some(("2025-01-10", "2025-01-31"))),
            with(phase(2, "EVALUACION", 2), None),
            with(phase(3, "FINAL", 3), None),
        ];
        let alloc = ScheduleAllocator::new(day("2025-01-10"));

        // FINAL has no configured neighbor, so its bounds allow the window.
        let c = alloc.compute_constraints(&all[2].phase, &all);
        let req = input("2025-01-15", "2025-01-20");
        assert!(alloc.validate(&req, &c).is_ok());

        assert_eq!(
            alloc.check_non_overlap(&all[2].phase, &req, &all),
            Err(RangeError::Overlaps {
                start: day("2025-01-15"),
                end: day("2025-01-20"),
                conflicting: "CONFIGURACION".into(),
                conflicting_start: day("2025-01-10"),
                conflicting_end: day("2025-01-31"),
            })
        );
        assert!(alloc
            .check_non_overlap(&all[2].phase, &input("2025-03-01", "2025-03-10"), &all)
            .is_ok());
    }

    #[test]
    fn test_non_overlap_ignores_own_schedule() {
        let all = vec![
            with(phase(1, "CONFIGURACION", 1), Some(("2025-01-10", "2025-01-31"))),
            with(phase(2, "EVALUACION", 2), Some(("2025-03-01", "2025-03-31"))),
        ];
        let alloc = ScheduleAllocator::new(day("2025-01-10"));
        assert!(alloc
            .check_non_overlap(&all[0].phase, &input("2025-01-10", "2025-02-20"), &all)
            .is_ok());
        assert!(matches!(
            alloc.check_non_overlap(&all[0].phase, &input("2025-01-10", "2025-03-01"), &all),
            Err(RangeError::Overlaps { .. })
        ));
    }
}
