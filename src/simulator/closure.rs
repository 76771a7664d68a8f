//! Adapter between the ACAT dynamics and the diffsol solver traits.

use diffsol::{ConstantOp, NonLinearOp, NonLinearOpJacobian, OdeEquations, OdeEquationsRef, Op};
use nalgebra::DVector;

use crate::dosing::{DoseProgram, DoseRate};
use crate::model::dynamics::derivatives;
use crate::model::scaled::ScaledModel;
use crate::model::state::N_STATES;

type T = f64;
type V = nalgebra::DVector<f64>;
type M = nalgebra::DMatrix<f64>;

pub struct AcatRhs<'a> {
    model: &'a ScaledModel,
    program: &'a DoseProgram,
}

impl<'a> Op for AcatRhs<'a> {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        N_STATES
    }
    fn nout(&self) -> usize {
        N_STATES
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl<'a> NonLinearOp for AcatRhs<'a> {
    fn call_inplace(&self, x: &Self::V, t: Self::T, y: &mut Self::V) {
        let rate = self.program.rate(t);
        derivatives(self.model, &rate, x, y);
    }
}

impl<'a> NonLinearOpJacobian for AcatRhs<'a> {
    fn jac_mul_inplace(&self, _x: &Self::V, _t: Self::T, v: &Self::V, y: &mut Self::V) {
        // Directional derivative approximated by evaluating the (mostly
        // linear) flux field on the direction itself, with dose input off.
        derivatives(self.model, &DoseRate::ZERO, v, y);
    }
}

pub struct AcatInit {
    init: V,
}

impl Op for AcatInit {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        N_STATES
    }
    fn nout(&self) -> usize {
        N_STATES
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl ConstantOp for AcatInit {
    fn call_inplace(&self, _t: Self::T, y: &mut Self::V) {
        y.copy_from(&self.init);
    }
}

/// Placeholder op for the unused mass/root/out slots.
pub struct AcatNoop;

impl Op for AcatNoop {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        N_STATES
    }
    fn nout(&self) -> usize {
        N_STATES
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl NonLinearOp for AcatNoop {
    fn call_inplace(&self, _x: &Self::V, _t: Self::T, _y: &mut Self::V) {}
}

impl diffsol::LinearOp for AcatNoop {
    fn gemv_inplace(&self, _x: &Self::V, _t: Self::T, _beta: Self::T, _y: &mut Self::V) {}
}

/// Owns the model and dosing program for the duration of one trajectory.
pub struct AcatProblem {
    model: ScaledModel,
    program: DoseProgram,
    init: V,
}

impl AcatProblem {
    pub fn new(model: ScaledModel, program: DoseProgram) -> Self {
        Self {
            model,
            program,
            init: DVector::zeros(N_STATES),
        }
    }
}

impl Op for AcatProblem {
    type T = T;
    type V = V;
    type M = M;
    fn nstates(&self) -> usize {
        N_STATES
    }
    fn nout(&self) -> usize {
        N_STATES
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl<'b> OdeEquationsRef<'b> for AcatProblem {
    type Rhs = AcatRhs<'b>;
    type Mass = AcatNoop;
    type Init = AcatInit;
    type Root = AcatNoop;
    type Out = AcatNoop;
}

impl OdeEquations for AcatProblem {
    fn rhs(&self) -> AcatRhs<'_> {
        AcatRhs {
            model: &self.model,
            program: &self.program,
        }
    }

    fn mass(&self) -> Option<AcatNoop> {
        None
    }

    fn init(&self) -> AcatInit {
        AcatInit {
            init: self.init.clone(),
        }
    }

    fn root(&self) -> Option<AcatNoop> {
        None
    }

    fn out(&self) -> Option<AcatNoop> {
        None
    }

    fn get_params(&self, _p: &mut V) {}

    fn set_params(&mut self, _p: &V) {}
}
