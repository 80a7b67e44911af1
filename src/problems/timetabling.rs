//! Exam timetabling with room assignment per slot.
//!
//! The master places every exam in one time slot, respecting student
//! conflicts and availability, and pays a per-student penalty for late slots.
//! Each slot is a subproblem that seats the students placed there into rooms at
//! a per-seat cost. A slot that cannot seat its exams is cut off by a
//! minimal overloaded set of exams, so the master never places that set
//! together again.

use std::collections::VecDeque;

use log::debug;

use crate::benders::{
    Assignment, BendersConfig, Controller, LinkingRow, Subproblem, SubproblemAdapter,
    SubproblemModel, Witness,
};
use crate::error::{Error, Result};
use crate::lp::{
    Constraint, LinearExpr, Model, ObjectiveSense, Sense, Solution, SolverConfig, Status, Var,
    VarKind, VarMap,
};

/// `(exam, slot)` index of a placement variable.
pub type Placement = (usize, usize);

#[derive(Debug, Clone)]
pub struct Timetabling {
    pub enrolments: Vec<f64>,
    /// Per-student penalty for sitting an exam in each slot
    pub slot_penalties: Vec<f64>,
    pub room_capacities: Vec<f64>,
    /// Per-seat cost of each room
    pub room_costs: Vec<f64>,
    /// Pairs of exams sharing students
    pub conflicts: Vec<(usize, usize)>,
    /// Placements that are not allowed at all
    pub unavailable: Vec<Placement>,
}

impl Default for Timetabling {
    fn default() -> Self {
        Self {
            enrolments: vec![60.0, 45.0, 40.0, 35.0, 30.0],
            slot_penalties: vec![0.0, 0.5, 1.0],
            room_capacities: vec![50.0, 40.0, 30.0],
            room_costs: vec![1.0, 1.2, 1.5],
            conflicts: vec![(0, 1), (1, 2), (3, 4)],
            unavailable: vec![(4, 0)],
        }
    }
}

/// Seats the exams placed in one slot.
struct SlotRooms {
    name: String,
    slot: usize,
    /// Exams that may sit in this slot, with their placement variable
    exams: Vec<(usize, Var)>,
    scope: Vec<Var>,
    linking: Vec<LinkingRow>,
    capacities: Vec<f64>,
    costs: Vec<f64>,
}

impl SlotRooms {
    /// Key with every exam outside `kept` moved out of the slot.
    fn only(&self, kept: &[Var]) -> Assignment {
        Assignment::new(
            self.scope
                .iter()
                .map(|&v| (v, if kept.contains(&v) { 1.0 } else { 0.0 })),
        )
    }
}

impl Subproblem for SlotRooms {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> &[Var] {
        &self.scope
    }

    fn linking(&self) -> &[LinkingRow] {
        &self.linking
    }

    fn build(&self, key: &Assignment) -> Result<SubproblemModel> {
        let mut model = Model::new(self.name.clone());
        let rooms = self.capacities.len();
        let domain = self
            .exams
            .iter()
            .flat_map(|&(e, _)| (0..rooms).map(move |r| (e, r)));
        let seats = VarMap::build(&mut model, "z", domain, |_| {
            (VarKind::Continuous, 0.0, f64::INFINITY)
        })?;

        let mut linking = Vec::with_capacity(self.exams.len());
        for (&(e, x), row) in self.exams.iter().zip(&self.linking) {
            let students = row.value(key).ok_or(Error::InvalidKey {
                subproblem: self.slot,
                var: x.index(),
            })?;
            let mut seated = LinearExpr::new();
            for r in 0..rooms {
                seated.add_term(seats.get(&(e, r))?, 1.0);
            }
            linking.push(model.add_constraint(
                seated,
                Sense::Eq,
                students,
                format!("seat[{}]", e),
            ));
        }
        for (r, &cap) in self.capacities.iter().enumerate() {
            let mut used = LinearExpr::new();
            for &(e, _) in &self.exams {
                used.add_term(seats.get(&(e, r))?, 1.0);
            }
            model.add_constraint(used, Sense::Le, cap, format!("capacity[{}]", r));
        }

        let cost: LinearExpr = seats
            .iter()
            .map(|(&(_, r), z)| (z, self.costs[r]))
            .collect();
        model.set_objective(cost, ObjectiveSense::Minimize);
        Ok(SubproblemModel { model, linking })
    }

    fn lower_bound(&self) -> f64 {
        0.0
    }

    /// `Σ_{e ∈ core} x[e, t] <= |core| - 1` for a minimal set of exams that
    /// cannot share the slot, found with a deletion filter.
    fn feasibility_cut(
        &self,
        key: &Assignment,
        _witness: &Witness,
        adapter: &SubproblemAdapter,
    ) -> Result<Option<Constraint>> {
        if !key.is_binary() {
            return Ok(None);
        }
        let mut core: Vec<Var> = key.ones().collect();
        let mut pending: VecDeque<Var> = core.iter().copied().collect();
        while let Some(candidate) = pending.pop_front() {
            let trial: Vec<Var> = core.iter().copied().filter(|&v| v != candidate).collect();
            if !adapter.solve(self, &self.only(&trial))?.is_feasible() {
                core = trial;
            }
        }
        if core.is_empty() {
            return Ok(None);
        }
        debug!(
            "{}: {} of {} placed exams cannot share the slot",
            self.name,
            core.len(),
            key.ones().count()
        );
        Ok(Some(Constraint::new(
            LinearExpr::sum(core.iter().copied()),
            Sense::Le,
            core.len() as f64 - 1.0,
            format!("overload[{}]", self.slot),
        )))
    }
}

impl Timetabling {
    pub fn num_exams(&self) -> usize {
        self.enrolments.len()
    }

    pub fn num_slots(&self) -> usize {
        self.slot_penalties.len()
    }

    /// Every allowed `(exam, slot)` placement, exam-major.
    pub fn placements(&self) -> impl Iterator<Item = Placement> + '_ {
        let slots = self.num_slots();
        (0..self.num_exams())
            .flat_map(move |e| (0..slots).map(move |t| (e, t)))
            .filter(move |p| !self.unavailable.contains(p))
    }

    fn validate(&self) -> Result<()> {
        let exams = self.num_exams();
        if self.room_costs.len() != self.room_capacities.len() {
            return Err(Error::InvalidModel(
                "timetabling: one cost per room expected".to_string(),
            ));
        }
        let unknown = self
            .conflicts
            .iter()
            .find(|&&(a, b)| a >= exams || b >= exams);
        if let Some(&(a, b)) = unknown {
            return Err(Error::InvalidIndex(format!(
                "timetabling: conflict ({}, {}) names an unknown exam",
                a, b
            )));
        }
        Ok(())
    }

    /// Placement variables, one-slot-per-exam rows, conflicts and slot
    /// penalties.
    fn placement_model(&self, name: &str) -> Result<(Model, VarMap<Placement>)> {
        self.validate()?;
        let mut model = Model::new(name);
        let place = VarMap::build(&mut model, "x", self.placements(), |_| {
            (VarKind::Binary, 0.0, 1.0)
        })?;

        for e in 0..self.num_exams() {
            let slots: Vec<Var> = (0..self.num_slots())
                .filter_map(|t| place.try_get(&(e, t)))
                .collect();
            model.add_constraint(
                LinearExpr::sum(slots),
                Sense::Eq,
                1.0,
                format!("exam[{}]", e),
            );
        }
        for &(a, b) in &self.conflicts {
            for t in 0..self.num_slots() {
                if let (Some(xa), Some(xb)) = (place.try_get(&(a, t)), place.try_get(&(b, t))) {
                    model.add_constraint(
                        LinearExpr::sum([xa, xb]),
                        Sense::Le,
                        1.0,
                        format!("conflict[{},{},{}]", a, b, t),
                    );
                }
            }
        }
        let penalty: LinearExpr = place
            .iter()
            .map(|(&(e, t), x)| (x, self.slot_penalties[t] * self.enrolments[e]))
            .collect();
        model.set_objective(penalty, ObjectiveSense::Minimize);
        Ok((model, place))
    }

    /// A controller with one room subproblem per slot, plus the placement
    /// variables for decoding the result.
    pub fn controller(&self, config: BendersConfig) -> Result<(Controller, VarMap<Placement>)> {
        let (model, place) = self.placement_model("timetabling_master")?;
        let mut controller = Controller::new(model, config)?;
        for t in 0..self.num_slots() {
            let exams: Vec<(usize, Var)> = (0..self.num_exams())
                .filter_map(|e| place.try_get(&(e, t)).map(|x| (e, x)))
                .collect();
            controller.add_subproblem(Box::new(SlotRooms {
                name: format!("timetabling_slot_{}", t),
                slot: t,
                scope: exams.iter().map(|&(_, x)| x).collect(),
                linking: exams
                    .iter()
                    .map(|&(e, x)| LinkingRow::scaled(x, self.enrolments[e]))
                    .collect(),
                exams,
                capacities: self.room_capacities.clone(),
                costs: self.room_costs.clone(),
            }))?;
        }
        Ok((controller, place))
    }

    /// Placement and seating in a single MIP.
    pub fn monolithic(&self) -> Result<(Model, VarMap<Placement>)> {
        let (mut model, place) = self.placement_model("timetabling_monolithic")?;
        let rooms = self.room_capacities.len();
        let domain: Vec<(usize, usize, usize)> = self
            .placements()
            .flat_map(|(e, t)| (0..rooms).map(move |r| (e, t, r)))
            .collect();
        let seats = VarMap::build(&mut model, "z", domain, |_| {
            (VarKind::Continuous, 0.0, f64::INFINITY)
        })?;

        for (&(e, t), x) in place.iter() {
            let mut seated = LinearExpr::term(x, -self.enrolments[e]);
            for r in 0..rooms {
                seated.add_term(seats.get(&(e, t, r))?, 1.0);
            }
            model.add_constraint(seated, Sense::Eq, 0.0, format!("seat[{},{}]", e, t));
        }
        for t in 0..self.num_slots() {
            for (r, &cap) in self.room_capacities.iter().enumerate() {
                let used: LinearExpr = (0..self.num_exams())
                    .filter_map(|e| seats.try_get(&(e, t, r)))
                    .map(|z| (z, 1.0))
                    .collect();
                model.add_constraint(used, Sense::Le, cap, format!("capacity[{},{}]", t, r));
            }
        }
        for (&(_, _, r), z) in seats.iter() {
            model.add_objective_term(z, self.room_costs[r]);
        }
        Ok((model, place))
    }

    pub fn solve_monolithic(&self, config: &SolverConfig) -> Result<Solution> {
        let (model, _) = self.monolithic()?;
        let sol = model.solve(config)?;
        if sol.status != Status::Optimal {
            return Err(Error::SolverNumerical {
                model: model.name().to_string(),
                iteration: 0,
                status: sol.status,
            });
        }
        Ok(sol)
    }

    /// The slot of every exam in a solution over `place`.
    pub fn schedule(&self, place: &VarMap<Placement>, values: &[f64]) -> Vec<Option<usize>> {
        let mut slots = vec![None; self.num_exams()];
        for (&(e, t), x) in place.iter() {
            if values.get(x.index()).map_or(false, |&v| v > 0.5) {
                slots[e] = Some(t);
            }
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benders::SubResult;

    #[test]
    fn test_unavailable_placement_has_no_variable() {
        let tt = Timetabling::default();
        let (_, place) = tt.monolithic().unwrap();
        assert_eq!(place.len(), 14);
        assert!(!place.contains(&(4, 0)));
        assert!(matches!(place.get(&(4, 0)), Err(Error::InvalidIndex(_))));
    }

    #[test]
    fn test_overload_core_is_minimal() {
        let tt = Timetabling::default();
        let (_controller, place) = tt.controller(BendersConfig::default()).unwrap();
        let exams: Vec<(usize, Var)> = (0..4)
            .map(|e| (e, place.get(&(e, 0)).unwrap()))
            .collect();
        let sub = SlotRooms {
            name: "slot0".to_string(),
            slot: 0,
            scope: exams.iter().map(|&(_, x)| x).collect(),
            linking: exams
                .iter()
                .map(|&(e, x)| LinkingRow::scaled(x, tt.enrolments[e]))
                .collect(),
            exams: exams.clone(),
            capacities: tt.room_capacities.clone(),
            costs: tt.room_costs.clone(),
        };
        let adapter = SubproblemAdapter::new(SolverConfig::default());
        // 60 + 45 + 40 = 145 students for 120 seats; exam 3 stays out
        let key = Assignment::new([
            (exams[0].1, 1.0),
            (exams[1].1, 1.0),
            (exams[2].1, 1.0),
            (exams[3].1, 0.0),
        ]);
        let witness = match adapter.solve(&sub, &key).unwrap() {
            SubResult::Infeasible(w) => w,
            other => panic!("expected infeasible, got {:?}", other),
        };
        let cut = sub.feasibility_cut(&key, &witness, &adapter).unwrap().unwrap();
        // Any two of {60, 45, 40} fit, all three do not.
        assert_eq!(cut.expr.terms().len(), 3);
        assert_eq!(cut.rhs, 2.0);
        assert!(cut.violation(&key_values(&key, place.len())) > 0.5);
    }

    fn key_values(key: &Assignment, n: usize) -> Vec<f64> {
        let mut values = vec![0.0; n];
        key.overlay(&mut values);
        values
    }

    #[test]
    fn test_schedule_decodes_placements() {
        let tt = Timetabling::default();
        let sol = tt.solve_monolithic(&SolverConfig::default()).unwrap();
        let (_, place) = tt.monolithic().unwrap();
        let schedule = tt.schedule(&place, &sol.values);
        assert!(schedule.iter().all(Option::is_some));
        for &(a, b) in &tt.conflicts {
            assert_ne!(schedule[a], schedule[b]);
        }
        assert_ne!(schedule[4], Some(0));
    }
}
