use crate::types::{AgentRole, Complexity, RequestType};
use serde::Serialize;

/// Capability descriptor for one agent role.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub role: AgentRole,
    pub name: &'static str,
    /// Short tag describing the agent's specialty.
    pub capability: &'static str,
    pub capabilities: &'static [&'static str],
    /// Weight of this agent's confidence in the overall score.
    pub weight: f64,
    #[serde(skip)]
    pub system_prompt: &'static str,
}

/// One row of the complexity tier table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierInfo {
    pub complexity: Complexity,
    pub agent_count: usize,
    pub token_budget: u32,
}

static ROSTER: [AgentProfile; 6] = [
    AgentProfile {
        role: AgentRole::Architect,
        name: "Senior Architect",
        capability: "architectural_design",
        capabilities: &[
            "Architectural design and planning",
            "Building code compliance",
            "Sustainable design integration",
            "Space optimization",
            "Site analysis",
        ],
        weight: 1.2,
        system_prompt: ARCHITECT_PROMPT,
    },
    AgentProfile {
        role: AgentRole::Designer,
        name: "Creative Designer",
        capability: "aesthetic_design",
        capabilities: &[
            "Visual composition",
            "User experience of spaces",
            "Color and material palettes",
            "Lighting strategy",
            "Biophilic design",
        ],
        weight: 1.0,
        system_prompt: DESIGNER_PROMPT,
    },
    AgentProfile {
        role: AgentRole::StructuralEngineer,
        name: "Structural Engineer",
        capability: "structural_analysis",
        capabilities: &[
            "Structural system design",
            "Load and seismic analysis",
            "Foundation design",
            "Construction method optimization",
            "Safety and risk assessment",
        ],
        weight: 1.1,
        system_prompt: STRUCTURAL_ENGINEER_PROMPT,
    },
    AgentProfile {
        role: AgentRole::MaterialExpert,
        name: "Material Expert",
        capability: "material_selection",
        capabilities: &[
            "Material specification",
            "Lifecycle and sustainability analysis",
            "Durability assessment",
            "Cost-benefit comparison",
            "Compatibility planning",
        ],
        weight: 1.0,
        system_prompt: MATERIAL_EXPERT_PROMPT,
    },
    AgentProfile {
        role: AgentRole::CodeGenerator,
        name: "Code Generator",
        capability: "building_automation",
        capabilities: &[
            "Building automation systems",
            "IoT sensor integration",
            "Energy management logic",
            "Control interfaces",
            "System integration APIs",
        ],
        weight: 1.0,
        system_prompt: CODE_GENERATOR_PROMPT,
    },
    AgentProfile {
        role: AgentRole::ProjectManager,
        name: "Project Manager",
        capability: "project_coordination",
        capabilities: &[
            "Planning and scheduling",
            "Team coordination",
            "Risk management",
            "Budget and resources",
            "Stakeholder communication",
        ],
        weight: 1.0,
        system_prompt: PROJECT_MANAGER_PROMPT,
    },
];

/// Every agent profile, in [`AgentRole::ALL`] order.
pub fn roster() -> &'static [AgentProfile] {
    &ROSTER
}

impl AgentRole {
    pub fn profile(&self) -> &'static AgentProfile {
        match self {
            AgentRole::Architect => &ROSTER[0],
            AgentRole::Designer => &ROSTER[1],
            AgentRole::StructuralEngineer => &ROSTER[2],
            AgentRole::MaterialExpert => &ROSTER[3],
            AgentRole::CodeGenerator => &ROSTER[4],
            AgentRole::ProjectManager => &ROSTER[5],
        }
    }

    /// Aggregation weight.
    pub fn weight(&self) -> f64 {
        self.profile().weight
    }
}

/// All roles ranked by relevance to a request type.
pub fn ranked_roles(request_type: RequestType) -> [AgentRole; 6] {
    use AgentRole::*;
    match request_type {
        RequestType::ArchitecturalDesign => [
            Architect,
            Designer,
            StructuralEngineer,
            MaterialExpert,
            ProjectManager,
            CodeGenerator,
        ],
        RequestType::StructuralAnalysis => [
            StructuralEngineer,
            Architect,
            MaterialExpert,
            ProjectManager,
            Designer,
            CodeGenerator,
        ],
        RequestType::MaterialSelection => [
            MaterialExpert,
            Architect,
            StructuralEngineer,
            Designer,
            ProjectManager,
            CodeGenerator,
        ],
        RequestType::SmartBuilding => [
            CodeGenerator,
            Architect,
            ProjectManager,
            StructuralEngineer,
            Designer,
            MaterialExpert,
        ],
        RequestType::ProjectPlanning => [
            ProjectManager,
            Architect,
            StructuralEngineer,
            MaterialExpert,
            Designer,
            CodeGenerator,
        ],
        RequestType::General => [
            Architect,
            Designer,
            ProjectManager,
            StructuralEngineer,
            MaterialExpert,
            CodeGenerator,
        ],
    }
}

/// The agents dispatched for a request: the top `complexity.agent_count()`
/// roles for its type, in dispatch order.
pub fn select_agents(request_type: RequestType, complexity: Complexity) -> Vec<AgentRole> {
    ranked_roles(request_type)
        .into_iter()
        .take(complexity.agent_count())
        .collect()
}

pub fn tier_table() -> Vec<TierInfo> {
    Complexity::ALL
        .iter()
        .map(|c| TierInfo {
            complexity: *c,
            agent_count: c.agent_count(),
            token_budget: c.token_budget(),
        })
        .collect()
}

const ARCHITECT_PROMPT: &str = r#"You are a senior architect with long experience in sustainable, code-compliant building design.

Focus on:
- Spatial organization, circulation and massing
- Site response, orientation and daylight
- Building codes, zoning and accessibility
- Sustainability targets (energy, water, embodied carbon)

Give a clear rationale for each design decision and note where it depends on engineering or cost input from other specialists."#;

const DESIGNER_PROMPT: &str = r#"You are a creative designer specializing in the experience and aesthetics of buildings.

Focus on:
- Atmosphere, proportion and visual composition
- Material and color palettes
- Natural and artificial lighting
- How occupants move through and use the spaces

Keep proposals buildable and say which choices affect structure or budget."#;

const STRUCTURAL_ENGINEER_PROMPT: &str = r#"You are a licensed structural engineer.

Focus on:
- Suitable structural systems and spans
- Gravity, wind and seismic loads
- Foundations and soil assumptions
- Constructability, safety factors and risks

State every assumption you make about loads, soils or codes. Safety is never traded against aesthetics."#;

const MATERIAL_EXPERT_PROMPT: &str = r#"You are a building materials specialist.

Focus on:
- Candidate materials for each major building element
- Performance, durability and maintenance
- Embodied carbon, recyclability and sourcing
- Cost ranges and compatibility between materials

Compare alternatives instead of naming a single option."#;

const CODE_GENERATOR_PROMPT: &str = r#"You are an engineer for building automation and smart building systems.

Focus on:
- Sensors, controls and integration protocols (BACnet, KNX, MQTT)
- Energy management and occupancy-driven automation
- Data flows, dashboards and system APIs
- Short configuration or code sketches where they clarify the design

Keep security and maintainability of the installed systems in view."#;

const PROJECT_MANAGER_PROMPT: &str = r#"You are a senior project manager for architecture and construction projects.

Focus on:
- Phasing, milestones and critical path
- Coordination between disciplines
- Budget, procurement and resource risks
- Approvals and stakeholder communication

Turn the design intent into a realistic delivery plan."#;
