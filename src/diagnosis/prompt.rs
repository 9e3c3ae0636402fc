/// Instruction sent with every image. Only the image varies between requests.
pub const DIAGNOSIS_INSTRUCTION: &str = "You are an expert plant pathologist. Analyze the plant leaf in this image and respond with the following sections, each on its own line starting with the label shown:

1. Plant Name:
2. Disease Name: (or \"Healthy\" if no disease is visible)
3. Severity: (Low, Medium, or High)
4. Likely Cause:
5. Step-by-step Treatment:
6. Organic/Natural Remedies:
7. Prevention Tips:";
