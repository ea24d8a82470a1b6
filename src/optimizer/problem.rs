//! Solver-independent linear program.
//!
//! The formulator writes into a [`Problem`]; solver adapters translate it into
//! their own model. Keeping the rows as plain data lets the materializer and
//! the tests evaluate any constraint against a candidate assignment.

use std::fmt;

/// Index of a decision variable in [`Problem::variables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

/// A decision variable with its bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub name: String,
    pub lower: f64,
    /// `None` means unbounded above.
    pub upper: Option<f64>,
    /// Restricted to whole numbers within the bounds.
    pub integer: bool,
}

impl VariableDef {
    /// Returns `true` when `value` lies within the bounds, widened by `tolerance`.
    pub fn contains(&self, value: f64, tolerance: f64) -> bool {
        value >= self.lower - tolerance && self.upper.is_none_or(|upper| value <= upper + tolerance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Eq,
    Le,
    Ge,
}

/// What a constraint row models. Indices refer to the fleet and site order of
/// the formulation that produced the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// State of charge after `step` follows from the state before it.
    SocCoupling { battery: usize, step: usize },
    /// Energy in equals energy out at `site` during `step`.
    PowerBalance { site: usize, step: usize },
    /// Links charge and discharge of `battery` to its direction indicator.
    BatteryDirection { battery: usize, step: usize },
    /// Links import and export of `site` to its direction indicator.
    GridDirection { site: usize, step: usize },
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SocCoupling { battery, step } => write!(f, "soc_coupling[{battery}][{step}]"),
            Self::PowerBalance { site, step } => write!(f, "power_balance[{site}][{step}]"),
            Self::BatteryDirection { battery, step } => {
                write!(f, "battery_direction[{battery}][{step}]")
            }
            Self::GridDirection { site, step } => write!(f, "grid_direction[{site}][{step}]"),
        }
    }
}

/// `Σ coefficient·variable  <sense>  rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub kind: ConstraintKind,
    pub terms: Vec<(VarId, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearConstraint {
    /// Left-hand side evaluated at `values`.
    pub fn lhs(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(var, coefficient)| coefficient * values[var.0])
            .sum()
    }

    /// `lhs − rhs`.
    pub fn residual(&self, values: &[f64]) -> f64 {
        self.lhs(values) - self.rhs
    }

    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let residual = self.residual(values);
        match self.sense {
            Sense::Eq => residual.abs() <= tolerance,
            Sense::Le => residual <= tolerance,
            Sense::Ge => residual >= -tolerance,
        }
    }

    /// Value `var` must take for this row to hold with equality, all other
    /// variables fixed at `values`.
    ///
    /// Returns `None` if `var` does not appear in the row.
    #[cfg(test)]
    pub fn solve_for(&self, var: VarId, values: &[f64]) -> Option<f64> {
        let coefficient = self
            .terms
            .iter()
            .find(|(v, _)| *v == var)
            .map(|&(_, c)| c)?;
        let mut rest = self.rhs;
        for &(v, c) in &self.terms {
            if v != var {
                rest -= c * values[v.0];
            }
        }
        Some(rest / coefficient)
    }
}

/// A minimization problem: bounded variables, some of them integer, linear
/// rows and a linear objective.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Problem {
    pub variables: Vec<VariableDef>,
    pub constraints: Vec<LinearConstraint>,
    /// Objective coefficients; variables not listed have coefficient zero.
    pub objective: Vec<(VarId, f64)>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variable(&mut self, name: String, lower: f64, upper: Option<f64>) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(VariableDef {
            name,
            lower,
            upper,
            integer: false,
        });
        id
    }

    /// Adds an integer variable restricted to `{0, 1}`.
    pub fn add_binary(&mut self, name: String) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(VariableDef {
            name,
            lower: 0.0,
            upper: Some(1.0),
            integer: true,
        });
        id
    }

    pub fn has_integers(&self) -> bool {
        self.variables.iter().any(|v| v.integer)
    }

    pub fn add_constraint(
        &mut self,
        kind: ConstraintKind,
        terms: Vec<(VarId, f64)>,
        sense: Sense,
        rhs: f64,
    ) {
        self.constraints.push(LinearConstraint {
            kind,
            terms,
            sense,
            rhs,
        });
    }

    pub fn variable(&self, id: VarId) -> &VariableDef {
        &self.variables[id.0]
    }

    /// Objective evaluated at `values`.
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective
            .iter()
            .map(|&(var, coefficient)| coefficient * values[var.0])
            .sum()
    }

    /// First constraint row not satisfied within `tolerance`.
    pub fn first_violation(&self, values: &[f64], tolerance: f64) -> Option<&LinearConstraint> {
        self.constraints
            .iter()
            .find(|c| !c.is_satisfied(values, tolerance))
    }

    #[cfg(test)]
    pub fn constraint(&self, kind: ConstraintKind) -> Option<&LinearConstraint> {
        self.constraints.iter().find(|c| c.kind == kind)
    }
}
