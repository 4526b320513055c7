//! Human readable status output.
//!
//! Purely observational: the reporter only ever reads [`GateStatus`] values
//! and writes lines through the `log` facade.

use core::fmt;

use heapless::Vec;
use log::{info, warn};

use crate::types::{FaultCode, GateState, GateStatus};

/// Most lines a single state change produces
pub const MAX_LINES_PER_CHANGE: usize = 4;

/// Fault diagnostics, selected by the state that failed and the fault code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultDiagnostic {
    OpeningTimeout,
    ClosingTimeout,
    InitLimitSwitch,
}

impl FaultDiagnostic {
    pub const fn classify(previous: GateState, code: FaultCode) -> Option<Self> {
        match (previous, code) {
            (GateState::Opening, FaultCode::RunTimeExceeded) => Some(Self::OpeningTimeout),
            (GateState::Closing, FaultCode::RunTimeExceeded) => Some(Self::ClosingTimeout),
            (GateState::Init, FaultCode::LimitSwitchConflict) => Some(Self::InitLimitSwitch),
            _ => None,
        }
    }

    pub const fn problem(self) -> &'static str {
        match self {
            Self::OpeningTimeout => {
                "ERROR OPENING LA PUERTA: REVISE LA POSICION DEL PORTON Y LOS LIMIT SWITCH."
            }
            Self::ClosingTimeout => {
                "ERROR CLOSING LA PUERTA: REVISE LA POSICION DEL PORTON Y LOS LIMIT SWITCH."
            }
            Self::InitLimitSwitch => {
                "ERROR INICIALIZANDO EL SISTEMA: REVISE LAS CONEXIONES DE LOS SENSORES LIMIT SWITCH."
            }
        }
    }

    pub const fn instruction(self) -> &'static str {
        match self {
            Self::OpeningTimeout | Self::ClosingTimeout => {
                "LUEGO DE HACER LAS REVISIONES PRESIONE EL BOTON PARA RETORNAR AL FUNCIONAMIENTO NORMAL."
            }
            Self::InitLimitSwitch => {
                "LUEGO DE ARREGLAR LOS SENSORES PRESIONE EL BOTON PARA REINICIAR EL SISTEMA."
            }
        }
    }
}

/// One console line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusLine {
    /// `ESTADO ACTUAL: ESTADO <NAME>`
    State(GateState),
    FaultProblem(FaultDiagnostic),
    FaultInstruction(FaultDiagnostic),
    /// Fault cleared, the machine is resuming towards the given state
    Recovered(GateState),
    /// Remote command received while the gate is at rest
    Mandate(GateState),
}

impl StatusLine {
    pub const fn is_warning(&self) -> bool {
        matches!(self, Self::FaultProblem(_) | Self::FaultInstruction(_))
    }

    /// Line logged when a remote trigger is consumed in `state`
    pub const fn mandate(state: GateState) -> Option<Self> {
        if state.is_quiescent() {
            Some(Self::Mandate(state))
        } else {
            None
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(state) => write!(f, "ESTADO ACTUAL: ESTADO {}", state.label()),
            Self::FaultProblem(diag) => f.write_str(diag.problem()),
            Self::FaultInstruction(diag) => f.write_str(diag.instruction()),
            Self::Recovered(GateState::Opening) => {
                f.write_str("DEVUELTA AL FUNCIONAMIENTO PARA ABRIR LA PUERTA")
            }
            Self::Recovered(GateState::Closing) => {
                f.write_str("DEVUELTA AL FUNCIONAMIENTO PARA CERRAR LA PUERTA")
            }
            Self::Recovered(_) => f.write_str("DEVUELTA AL FUNCIONAMIENTO PARA REINICIAR EL SISTEMA"),
            Self::Mandate(GateState::Open) => f.write_str("MANDATO: CERRAR EL PORTON"),
            Self::Mandate(_) => f.write_str("MANDATO: ABRIR EL PORTON"),
        }
    }
}

/// Lines describing a change from `old` to the state in `status`
pub fn lines_for(old: Option<GateState>, status: &GateStatus) -> Vec<StatusLine, MAX_LINES_PER_CHANGE> {
    let mut lines = Vec::new();

    let resumed = matches!(
        status.state,
        GateState::Init | GateState::Opening | GateState::Closing
    );
    if old == Some(GateState::Fault) && resumed {
        let _ = lines.push(StatusLine::Recovered(status.state));
    }
    let _ = lines.push(StatusLine::State(status.state));

    if status.state == GateState::Fault {
        if let Some(diag) = FaultDiagnostic::classify(status.previous_state, status.fault_code) {
            let _ = lines.push(StatusLine::FaultProblem(diag));
            let _ = lines.push(StatusLine::FaultInstruction(diag));
        }
    }
    lines
}

/// Prints state changes, once per distinct sampled state
#[derive(Debug, Default)]
pub struct StatusReporter {
    last_reported: Option<GateState>,
}

impl StatusReporter {
    pub const fn new() -> Self {
        Self {
            last_reported: None,
        }
    }

    pub fn last_reported(&self) -> Option<GateState> {
        self.last_reported
    }

    /// Report `status` if its state differs from the last one reported.
    /// Returns the lines emitted, empty when nothing changed.
    pub fn observe(&mut self, status: &GateStatus) -> Vec<StatusLine, MAX_LINES_PER_CHANGE> {
        if self.last_reported == Some(status.state) {
            return Vec::new();
        }
        let old = self.last_reported.replace(status.state);
        self.on_state_change(old, status)
    }

    fn on_state_change(
        &self,
        old: Option<GateState>,
        status: &GateStatus,
    ) -> Vec<StatusLine, MAX_LINES_PER_CHANGE> {
        let lines = lines_for(old, status);
        for line in &lines {
            emit(line);
        }
        lines
    }
}

/// Write a single line through the log facade
pub fn emit(line: &StatusLine) {
    if line.is_warning() {
        warn!("{}", line);
    } else {
        info!("{}", line);
    }
}
