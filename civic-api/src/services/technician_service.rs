use std::collections::HashSet;

use uuid::Uuid;

use crate::models::{Assignment, Technician};
use crate::registry::Entity;
use crate::rows::filter::{Condition, Sort};
use crate::rows::{decode_all, RowResult, RowService};

/// Technicians whose id appears in none of the given assignments.
/// Input order is preserved.
pub fn without_assignments(technicians: Vec<Technician>, assignments: &[Assignment]) -> Vec<Technician> {
    let busy: HashSet<Uuid> = assignments.iter().map(|a| a.technician_id).collect();
    technicians.into_iter().filter(|t| !busy.contains(&t.id)).collect()
}

/// Technicians of `department` that hold no assignment at all.
pub async fn unassigned_in_department(rows: &RowService, department: &str) -> RowResult<Vec<Technician>> {
    let technicians: Vec<Technician> = decode_all(
        rows.select_rows(
            Entity::Technicians,
            vec![Condition::eq("department", department)],
            None,
            Some(Sort::asc("name")),
        )
        .await?,
    )?;
    if technicians.is_empty() {
        return Ok(technicians);
    }

    let assignments: Vec<Assignment> =
        decode_all(rows.select_rows(Entity::Assigned, vec![], None, None).await?)?;

    let free = without_assignments(technicians, &assignments);
    tracing::debug!(department, available = free.len(), "computed unassigned technicians");
    Ok(free)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssignmentStatus;
    use chrono::Utc;

    fn technician(name: &str) -> Technician {
        Technician {
            id: Uuid::new_v4(),
            name: name.into(),
            email: format!("{}@city.gov", name.to_lowercase()),
            phone: "5550100".into(),
            department: "roads".into(),
            created_at: Utc::now(),
        }
    }

    fn assignment(technician_id: Uuid) -> Assignment {
        Assignment {
            id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            technician_id,
            department: Some("roads".into()),
            status: AssignmentStatus::Assigned,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn removes_only_assigned_technicians() {
        let (t1, t2, t3) = (technician("T1"), technician("T2"), technician("T3"));
        let busy = [assignment(t2.id)];

        let free = without_assignments(vec![t1.clone(), t2, t3.clone()], &busy);
        let ids: Vec<Uuid> = free.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![t1.id, t3.id]);
    }

    #[test]
    fn everyone_assigned_leaves_nothing() {
        let crew = vec![technician("T1"), technician("T2")];
        let busy: Vec<Assignment> = crew.iter().map(|t| assignment(t.id)).collect();
        assert!(without_assignments(crew, &busy).is_empty());
    }
}
